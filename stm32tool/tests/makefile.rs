use std::{fs, path::Path};

use stm32tool::{
    config::{Platform, ProjectConfig, ResolvedFile},
    makefile, mcu,
};
use tempfile::tempdir;

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "").unwrap();
}

fn f407_config(root: &Path) -> ProjectConfig {
    let mut config = ProjectConfig::defaults(Platform::Linux);
    config.project_name = "blinky".into();
    config.set_linker_script(ResolvedFile::from_path(root.join("STM32F407VGTX_FLASH.ld")));
    config.set_startup_file(ResolvedFile::from_path(
        root.join("Core/Startup/startup_stm32f407xx.s"),
    ));
    config
}

#[test]
fn render_is_deterministic() {
    let dir = tempdir().unwrap();
    let mut config = f407_config(dir.path());
    config.exclude_files.insert("b_test.c".into());
    config.exclude_files.insert("a_test.c".into());

    let first = makefile::render(dir.path(), &config, config.mcu_params());
    let second = makefile::render(dir.path(), &config.clone(), config.mcu_params());
    assert_eq!(first, second);
    assert!(first.contains("EXCLUDE_FILES = \\\na_test.c \\\nb_test.c\n"));
}

#[test]
fn f407_flags() {
    let dir = tempdir().unwrap();
    let config = f407_config(dir.path());
    let params = mcu::lookup(&config.mcu);
    let text = makefile::render(dir.path(), &config, params);

    assert!(text.contains("-mcpu=cortex-m4"));
    assert!(text.contains("-mfpu=fpv4-sp-d16"));
    assert!(text.contains("-mfloat-abi=hard"));
    assert!(text.contains("-DSTM32F407xx"));
    assert!(text.contains("-DUSE_HAL_DRIVER"));
    assert!(text.contains("ASM_SOURCES = Core/Startup/startup_stm32f407xx.s\n"));
    assert!(text.contains("LDSCRIPT_DIR = .\n"));
}

#[test]
fn excluded_files_are_not_compiled() {
    let dir = tempdir().unwrap();
    touch(dir.path(), "Core/Src/main.c");
    touch(dir.path(), "Core/Src/main_test.c");
    touch(dir.path(), "Core/Src/gpio.c");
    touch(dir.path(), "Core/Src/notes.txt");

    let mut config = f407_config(dir.path());
    config.source_dirs = vec!["Core/Src".into(), "Missing/Src".into()];
    config.exclude_files.insert("main_test.c".into());

    assert_eq!(
        makefile::collect_sources(dir.path(), &config),
        vec!["Core/Src/gpio.c", "Core/Src/main.c"]
    );

    let text = makefile::render(dir.path(), &config, config.mcu_params());
    assert!(text.contains("C_SOURCE_DIRS = \\\nCore/Src \\\nMissing/Src\n"));
    assert!(text.contains("EXCLUDE_FILES = \\\nmain_test.c\n"));
    assert!(text.contains("$(filter-out $(addprefix %,$(EXCLUDE_FILES))"));
}

#[test]
fn missing_makefile_is_stale() {
    let dir = tempdir().unwrap();
    let config = f407_config(dir.path());
    let freshness = makefile::check_freshness(dir.path(), &config, config.mcu_params());
    assert!(!freshness.up_to_date);
    let details = freshness.details.unwrap();
    assert!(!details.makefile_exists);
    assert_eq!(details.current_startup, None);
    assert_eq!(details.current_ldscript, None);
}

#[test]
fn written_makefile_is_fresh() {
    let dir = tempdir().unwrap();
    let config = f407_config(dir.path());
    makefile::write(dir.path(), &makefile::render(dir.path(), &config, config.mcu_params())).unwrap();

    let freshness = makefile::check_freshness(dir.path(), &config, config.mcu_params());
    assert!(freshness.up_to_date);
    assert_eq!(freshness.details, None);
}

#[test]
fn switching_mcu_makes_it_stale() {
    let dir = tempdir().unwrap();
    let mut config = f407_config(dir.path());
    makefile::write(dir.path(), &makefile::render(dir.path(), &config, config.mcu_params())).unwrap();

    config.set_mcu("STM32F103C8Tx");
    let freshness = makefile::check_freshness(dir.path(), &config, config.mcu_params());
    assert!(!freshness.up_to_date);

    let details = freshness.details.unwrap();
    assert!(details.makefile_exists);
    assert_eq!(details.expected_startup, "startup_stm32f103xb");
    assert_eq!(details.expected_ldscript.as_deref(), Some("STM32F103C8TX_FLASH.ld"));
    assert_eq!(details.current_startup.as_deref(), Some("startup_stm32f407xx"));
    assert_eq!(details.current_ldscript.as_deref(), Some("STM32F407VGTX_FLASH.ld"));

    let report = details.to_string();
    assert!(report.contains("startup: startup_stm32f407xx (expected startup_stm32f103xb)"));
}

#[test]
fn spaced_workspace_renders_relative_paths() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("My Project");
    touch(&root, "Core/Startup/startup_stm32f407xx.s");
    touch(&root, "Linker/STM32F407VGTX_FLASH.ld");

    let mut config = f407_config(&root);
    config.set_linker_script(ResolvedFile::from_path(
        root.join("Linker/STM32F407VGTX_FLASH.ld"),
    ));
    let text = makefile::render(&root, &config, config.mcu_params());

    assert!(text.contains("ASM_SOURCES = Core/Startup/startup_stm32f407xx.s\n"));
    assert!(text.contains("LDSCRIPT_DIR = Linker\n"));
    assert!(!text.contains("My Project"));

    makefile::write(&root, &text).unwrap();
    assert!(makefile::check_freshness(&root, &config, config.mcu_params()).up_to_date);
}

#[test]
fn uppercase_startup_gets_an_object() {
    let dir = tempdir().unwrap();
    let mut config = f407_config(dir.path());
    config.set_startup_file(ResolvedFile::from_path(
        dir.path().join("Lib/startup_stm32f407xx.S"),
    ));
    let text = makefile::render(dir.path(), &config, config.mcu_params());

    assert!(text.contains("ASM_SOURCES = Lib/startup_stm32f407xx.S\n"));
    assert!(text.contains("$(patsubst %.S,%.o,$(ASM_SOURCES:.s=.o))"));
    assert!(text.contains("$(BUILD_DIR)/%.o: %.S Makefile | $(BUILD_DIR)\n"));
}

#[test]
fn write_into_a_directory_fails() {
    let dir = tempdir().unwrap();
    fs::create_dir(makefile::makefile_path(dir.path())).unwrap();

    let config = f407_config(dir.path());
    let text = makefile::render(dir.path(), &config, config.mcu_params());
    let err = makefile::write(dir.path(), &text).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("failed to write"), "{msg}");
    assert!(msg.contains("Makefile"), "{msg}");
}
