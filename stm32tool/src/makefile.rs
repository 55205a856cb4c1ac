//! Makefile generation.
//!
//! The Makefile is a disposable artifact: it is rendered in one piece from
//! the configuration and overwritten on every change, never patched.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use anyhow::Context;
use regex::Regex;

use crate::{
    config::ProjectConfig,
    mcu::{self, McuParams},
    utils::expand_workspace_folder,
};

pub const MAKEFILE: &str = "Makefile";
pub const BUILD_DIR: &str = "build";
pub const FLASH_ADDRESS: &str = "0x08000000";

pub fn makefile_path(workspace: &Path) -> PathBuf {
    workspace.join(MAKEFILE)
}

struct MakeBuf(String);

impl MakeBuf {
    fn new() -> Self {
        Self(String::new())
    }

    fn push(&mut self, s: &str) {
        self.0.push_str(s);
        self.0.push('\n');
    }

    fn var(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            self.push(&format!("{name} ="));
        } else {
            self.push(&format!("{name} = {value}"));
        }
    }

    /// One item per line, joined with backslash continuations.
    fn list<S: AsRef<str>>(&mut self, name: &str, items: &[S]) {
        if items.is_empty() {
            self.var(name, "");
            return;
        }
        self.push(&format!("{name} = \\"));
        for (i, item) in items.iter().enumerate() {
            if i + 1 == items.len() {
                self.push(item.as_ref());
            } else {
                self.push(&format!("{} \\", item.as_ref()));
            }
        }
    }

    fn rule(&mut self, target: &str, deps: &str, recipe: &[&str]) {
        if deps.is_empty() {
            self.push(&format!("{target}:"));
        } else {
            self.push(&format!("{target}: {deps}"));
        }
        for line in recipe {
            self.push(&format!("\t{line}"));
        }
        self.push("");
    }

    fn section(&mut self, title: &str) {
        self.push("");
        self.push(&format!("# {title}"));
    }
}

/// Splits a compiler path into its directory and the tool prefix,
/// e.g. `/opt/gcc/bin/arm-none-eabi-gcc` -> (`/opt/gcc/bin`, `arm-none-eabi-`).
/// Both separators are accepted so Windows paths render the same anywhere.
fn toolchain_parts(gcc_path: &Path) -> (Option<String>, String) {
    let path = gcc_path.to_string_lossy().to_string();
    let (dir, file) = match path.rfind(['/', '\\']) {
        Some(i) => (Some(path[..i].to_string()), &path[i + 1..]),
        None => (None, path.as_str()),
    };
    let file = file.strip_suffix(".exe").unwrap_or(file);
    let prefix = file.strip_suffix("gcc").unwrap_or("arm-none-eabi-");
    (dir.filter(|d| !d.is_empty()), prefix.to_string())
}

fn split_dir(path: &str) -> String {
    match path.rfind(['/', '\\']) {
        Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
        None => ".".to_string(),
    }
}

/// `path` relative to the workspace with `/` separators, the way CubeMX
/// writes it. Files outside the workspace keep their absolute path.
fn workspace_relative(workspace: &Path, path: &Path) -> String {
    let text = match path.strip_prefix(workspace) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().to_string(),
    };
    if text.contains(char::is_whitespace) {
        warn!("make can not handle the space in {text}, move the file or rename its directories");
    }
    text
}

/// Renders the complete Makefile. Pure: equal inputs give identical text.
///
/// Startup and linker paths are written relative to `workspace`, which is
/// also where `${workspaceFolder}` in the tool paths points.
pub fn render(workspace: &Path, config: &ProjectConfig, params: &McuParams) -> String {
    let mut mk = MakeBuf::new();
    mk.push("##########################################################################");
    mk.push(&format!("# Generated by stm32tool for {}.", config.mcu));
    mk.push("# Do not edit: run `stm32tool generate` after changing the configuration.");
    mk.push("##########################################################################");
    mk.push("");
    mk.var("TARGET", &config.project_name);
    mk.push("");
    mk.var("DEBUG", "1");
    mk.var("OPT", "-Og");
    mk.var("BUILD_DIR", BUILD_DIR);

    mk.section("sources");
    mk.list("C_SOURCE_DIRS", &config.source_dirs);
    let excludes: Vec<&String> = config.exclude_files.iter().collect();
    mk.list("EXCLUDE_FILES", &excludes);
    mk.var(
        "C_SOURCES",
        "$(filter-out $(addprefix %,$(EXCLUDE_FILES)),$(foreach d,$(C_SOURCE_DIRS),$(wildcard $(d)/*.c)))",
    );
    match config.startup_file() {
        Some(startup) => mk.var("ASM_SOURCES", &workspace_relative(workspace, &startup.path)),
        None => {
            mk.push("# startup file not resolved, run `stm32tool resolve`");
            mk.var("ASM_SOURCES", "");
        }
    }

    mk.section("toolchain");
    let gcc_path = expand_workspace_folder(&config.gcc_path.to_string_lossy(), workspace);
    let (gcc_dir, prefix) = toolchain_parts(Path::new(&gcc_path));
    mk.var("PREFIX", &prefix);
    // `GCC_PATH` may contain spaces
    let tool = |name: &str| match &gcc_dir {
        Some(_) => format!("\"$(GCC_PATH)/$(PREFIX){name}\""),
        None => format!("$(PREFIX){name}"),
    };
    if let Some(dir) = &gcc_dir {
        mk.var("GCC_PATH", dir);
    }
    mk.var("CC", &tool("gcc"));
    mk.var("AS", &format!("{} -x assembler-with-cpp", tool("gcc")));
    mk.var("CP", &tool("objcopy"));
    mk.var("SZ", &tool("size"));
    mk.var("HEX", "$(CP) -O ihex");
    mk.var("BIN", "$(CP) -O binary -S");
    mk.var(
        "PROGRAMMER",
        &expand_workspace_folder(&config.programmer_path.to_string_lossy(), workspace),
    );

    mk.section("flags");
    mk.var("CPU", &params.cpu_flag());
    mk.var("FPU", &params.fpu_flag().unwrap_or_default());
    mk.var("FLOAT-ABI", &params.float_abi_flag());
    mk.var("MCU", "$(CPU) -mthumb $(FPU) $(FLOAT-ABI)");
    mk.var("AS_DEFS", "");
    let defines: Vec<String> = config
        .all_defines()
        .iter()
        .map(|d| format!("-D{d}"))
        .collect();
    mk.list("C_DEFS", &defines);
    mk.var("AS_INCLUDES", "");
    let includes: Vec<String> = config.include_dirs.iter().map(|d| format!("-I{d}")).collect();
    mk.list("C_INCLUDES", &includes);
    mk.var(
        "ASFLAGS",
        "$(MCU) $(AS_DEFS) $(AS_INCLUDES) $(OPT) -Wall -fdata-sections -ffunction-sections",
    );
    mk.var(
        "CFLAGS",
        "$(MCU) $(C_DEFS) $(C_INCLUDES) $(OPT) -Wall -fdata-sections -ffunction-sections",
    );
    mk.push("ifeq ($(DEBUG), 1)");
    mk.push("CFLAGS += -g -gdwarf-2");
    mk.push("endif");
    mk.push("CFLAGS += -MMD -MP -MF\"$(@:%.o=%.d)\"");

    mk.section("link");
    let mut ldflags = "$(MCU) -specs=nano.specs".to_string();
    match config.linker_script() {
        Some(ld) => {
            mk.var("LDSCRIPT_DIR", &split_dir(&workspace_relative(workspace, &ld.path)));
            mk.var("LDSCRIPT", &ld.name);
            ldflags += " -L$(LDSCRIPT_DIR) -T$(LDSCRIPT)";
        }
        None => {
            mk.push("# linker script not resolved, run `stm32tool resolve`");
            mk.var("LDSCRIPT", "");
        }
    }
    mk.var("LIBS", "-lc -lm -lnosys");
    mk.var("LIBDIR", "");
    ldflags += " $(LIBDIR) $(LIBS) -Wl,-Map=$(BUILD_DIR)/$(TARGET).map,--cref -Wl,--gc-sections";
    mk.var("LDFLAGS", &ldflags);
    if let Some(size) = &config.stack_size {
        mk.push(&format!("LDFLAGS += -Wl,--defsym=_Min_Stack_Size={size}"));
    }
    if let Some(size) = &config.heap_size {
        mk.push(&format!("LDFLAGS += -Wl,--defsym=_Min_Heap_Size={size}"));
    }

    mk.section("build");
    mk.push("");
    mk.rule(
        "all",
        "$(BUILD_DIR)/$(TARGET).elf $(BUILD_DIR)/$(TARGET).hex $(BUILD_DIR)/$(TARGET).bin",
        &[],
    );
    mk.push("OBJECTS = $(addprefix $(BUILD_DIR)/,$(notdir $(C_SOURCES:.c=.o)))");
    mk.push("vpath %.c $(sort $(dir $(C_SOURCES)))");
    // startup files come as `.s` or as preprocessed `.S`
    mk.push(
        "OBJECTS += $(addprefix $(BUILD_DIR)/,$(notdir $(patsubst %.S,%.o,$(ASM_SOURCES:.s=.o))))",
    );
    mk.push("vpath %.s $(sort $(dir $(ASM_SOURCES)))");
    mk.push("vpath %.S $(sort $(dir $(ASM_SOURCES)))");
    mk.push("");
    mk.rule(
        "$(BUILD_DIR)/%.o",
        "%.c Makefile | $(BUILD_DIR)",
        &["$(CC) -c $(CFLAGS) -Wa,-a,-ad,-alms=$(BUILD_DIR)/$(notdir $(<:.c=.lst)) $< -o $@"],
    );
    mk.rule(
        "$(BUILD_DIR)/%.o",
        "%.s Makefile | $(BUILD_DIR)",
        &["$(AS) -c $(ASFLAGS) $< -o $@"],
    );
    mk.rule(
        "$(BUILD_DIR)/%.o",
        "%.S Makefile | $(BUILD_DIR)",
        &["$(AS) -c $(ASFLAGS) $< -o $@"],
    );
    mk.rule(
        "$(BUILD_DIR)/$(TARGET).elf",
        "$(OBJECTS) Makefile",
        &["$(CC) $(OBJECTS) $(LDFLAGS) -o $@", "$(SZ) $@"],
    );
    mk.rule("$(BUILD_DIR)/%.hex", "$(BUILD_DIR)/%.elf | $(BUILD_DIR)", &["$(HEX) $< $@"]);
    mk.rule("$(BUILD_DIR)/%.bin", "$(BUILD_DIR)/%.elf | $(BUILD_DIR)", &["$(BIN) $< $@"]);
    mk.rule("$(BUILD_DIR)", "", &["mkdir $@"]);
    let flash = format!("\"$(PROGRAMMER)\" -c port=SWD -w $< {FLASH_ADDRESS} -v -rst");
    mk.rule("flash", "$(BUILD_DIR)/$(TARGET).bin", &[flash.as_str()]);
    mk.rule("clean", "", &["-rm -fR $(BUILD_DIR)"]);
    mk.push("-include $(wildcard $(BUILD_DIR)/*.d)");
    mk.push("");
    mk.push(".PHONY: all clean flash");
    mk.0
}

pub fn write(workspace: &Path, text: &str) -> anyhow::Result<()> {
    let path = makefile_path(workspace);
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Makefile written to {}", path.display());
    Ok(())
}

/// C files of every source directory, minus the excluded names.
/// Mirrors the `C_SOURCES` expression of the rendered Makefile.
pub fn collect_sources(workspace: &Path, config: &ProjectConfig) -> Vec<String> {
    let mut sources = vec![];
    for dir in &config.source_dirs {
        let Ok(entries) = fs::read_dir(workspace.join(dir)) else {
            debug!("source directory {dir} not found");
            continue;
        };
        let mut found: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".c"))
            .map(|name| format!("{}/{name}", dir.trim_end_matches('/')))
            .filter(|path| !config.exclude_files.iter().any(|ex| path.ends_with(ex.as_str())))
            .collect();
        found.sort();
        for path in found {
            if !sources.contains(&path) {
                sources.push(path);
            }
        }
    }
    sources
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessDetails {
    pub makefile_exists: bool,
    pub current_startup: Option<String>,
    pub expected_startup: String,
    pub current_ldscript: Option<String>,
    pub expected_ldscript: Option<String>,
}

impl fmt::Display for FreshnessDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.makefile_exists {
            return write!(f, "{MAKEFILE} does not exist");
        }
        let none = "<none>".to_string();
        writeln!(
            f,
            "startup: {} (expected {})",
            self.current_startup.as_ref().unwrap_or(&none),
            self.expected_startup
        )?;
        write!(
            f,
            "linker script: {} (expected {})",
            self.current_ldscript.as_ref().unwrap_or(&none),
            self.expected_ldscript.as_ref().unwrap_or(&none)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub up_to_date: bool,
    /// Present when stale.
    pub details: Option<FreshnessDetails>,
}

static ASM_SOURCES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^ASM_SOURCES[ \t]*=[ \t]*(\S+)").unwrap());
static LDSCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^LDSCRIPT[ \t]*=[ \t]*(\S+)").unwrap());

fn file_stem(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

/// Checks that the Makefile on disk references the startup file and linker
/// script the current configuration calls for.
pub fn check_freshness(workspace: &Path, config: &ProjectConfig, params: &McuParams) -> Freshness {
    let expected_startup = config
        .startup_file()
        .map(|f| f.stem().to_string())
        .unwrap_or_else(|| params.startup.to_string());
    let expected_ldscript = config
        .linker_script()
        .map(|f| f.name.clone())
        .or_else(|| mcu::expected_linker_script(&config.mcu));

    let content = match fs::read_to_string(makefile_path(workspace)) {
        Ok(content) => content,
        Err(e) => {
            debug!("can not read {MAKEFILE}: {e}");
            return Freshness {
                up_to_date: false,
                details: Some(FreshnessDetails {
                    makefile_exists: false,
                    current_startup: None,
                    expected_startup,
                    current_ldscript: None,
                    expected_ldscript,
                }),
            };
        }
    };

    let current_startup = ASM_SOURCES_RE
        .captures(&content)
        .and_then(|c| c.get(1))
        .map(|m| file_stem(m.as_str()));
    let current_ldscript = LDSCRIPT_RE
        .captures(&content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let startup_ok = content.contains(&expected_startup);
    let ldscript_ok = expected_ldscript
        .as_ref()
        .is_none_or(|ld| content.contains(ld.as_str()));

    if startup_ok && ldscript_ok {
        return Freshness {
            up_to_date: true,
            details: None,
        };
    }
    Freshness {
        up_to_date: false,
        details: Some(FreshnessDetails {
            makefile_exists: true,
            current_startup,
            expected_startup,
            current_ldscript,
            expected_ldscript,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Platform, ResolvedFile};

    fn resolved_config() -> ProjectConfig {
        let mut config = ProjectConfig::defaults(Platform::Linux);
        config.project_name = "blinky".into();
        config.set_linker_script(ResolvedFile::from_path("/w/STM32F407VGTX_FLASH.ld"));
        config.set_startup_file(ResolvedFile::from_path("/w/Core/Startup/startup_stm32f407xx.s"));
        config
    }

    #[test]
    fn toolchain_prefix() {
        assert_eq!(
            toolchain_parts(Path::new("/usr/bin/arm-none-eabi-gcc")),
            (Some("/usr/bin".to_string()), "arm-none-eabi-".to_string())
        );
        assert_eq!(
            toolchain_parts(Path::new(r"C:\gcc\bin\arm-none-eabi-gcc.exe")),
            (Some(r"C:\gcc\bin".to_string()), "arm-none-eabi-".to_string())
        );
        assert_eq!(
            toolchain_parts(Path::new("arm-none-eabi-gcc")),
            (None, "arm-none-eabi-".to_string())
        );
    }

    #[test]
    fn renders_flags_and_link_step() {
        let config = resolved_config();
        let text = render(Path::new("/w"), &config, config.mcu_params());

        assert!(text.contains("TARGET = blinky\n"));
        assert!(text.contains("CPU = -mcpu=cortex-m4\n"));
        assert!(text.contains("FPU = -mfpu=fpv4-sp-d16\n"));
        assert!(text.contains("FLOAT-ABI = -mfloat-abi=hard\n"));
        assert!(text.contains("C_DEFS = \\\n-DUSE_HAL_DRIVER \\\n-DSTM32F407xx\n"));
        assert!(text.contains("ASM_SOURCES = Core/Startup/startup_stm32f407xx.s\n"));
        assert!(text.contains("LDSCRIPT_DIR = .\n"));
        assert!(text.contains("LDSCRIPT = STM32F407VGTX_FLASH.ld\n"));
        assert!(text.contains("-L$(LDSCRIPT_DIR) -T$(LDSCRIPT)"));
        assert!(text.contains("GCC_PATH = /usr/bin\n"));
        assert!(text.contains("CC = \"$(GCC_PATH)/$(PREFIX)gcc\"\n"));
        assert!(text.contains("\n\t$(CC) $(OBJECTS) $(LDFLAGS) -o $@\n"));
        assert!(text.contains(".PHONY: all clean flash"));
    }

    #[test]
    fn include_order_is_kept() {
        let mut config = resolved_config();
        config.include_dirs = vec!["B/Inc".into(), "A/Inc".into()];
        let text = render(Path::new("/w"), &config, config.mcu_params());
        assert!(text.contains("C_INCLUDES = \\\n-IB/Inc \\\n-IA/Inc\n"));
    }

    #[test]
    fn soft_float_part_has_empty_fpu() {
        let mut config = resolved_config();
        config.set_mcu("STM32F103C8Tx");
        let text = render(Path::new("/w"), &config, config.mcu_params());
        assert!(text.contains("FPU =\n"));
        assert!(text.contains("FLOAT-ABI = -mfloat-abi=soft\n"));
        assert!(text.contains("# linker script not resolved"));
        assert!(!text.contains("-T$(LDSCRIPT)"));
    }

    #[test]
    fn stack_and_heap() {
        let mut config = resolved_config();
        config.stack_size = Some("0x800".into());
        config.heap_size = Some("0x400".into());
        let text = render(Path::new("/w"), &config, config.mcu_params());
        assert!(text.contains("LDFLAGS += -Wl,--defsym=_Min_Stack_Size=0x800\n"));
        assert!(text.contains("LDFLAGS += -Wl,--defsym=_Min_Heap_Size=0x400\n"));
    }

    #[test]
    fn preprocessed_startup_is_assembled() {
        let mut config = resolved_config();
        config.set_startup_file(ResolvedFile::from_path("/w/Lib/startup_stm32f407xx.S"));
        let text = render(Path::new("/w"), &config, config.mcu_params());

        assert!(text.contains("ASM_SOURCES = Lib/startup_stm32f407xx.S\n"));
        assert!(text.contains(
            "OBJECTS += $(addprefix $(BUILD_DIR)/,$(notdir $(patsubst %.S,%.o,$(ASM_SOURCES:.s=.o))))\n"
        ));
        assert!(text.contains("vpath %.S $(sort $(dir $(ASM_SOURCES)))\n"));
        assert!(text.contains(
            "$(BUILD_DIR)/%.o: %.S Makefile | $(BUILD_DIR)\n\t$(AS) -c $(ASFLAGS) $< -o $@\n"
        ));
    }

    #[test]
    fn paths_are_relative_to_the_workspace() {
        let mut config = resolved_config();
        config.set_linker_script(ResolvedFile::from_path(
            "/home/me/My Project/ld/STM32F407VGTX_FLASH.ld",
        ));
        config.set_startup_file(ResolvedFile::from_path(
            "/home/me/My Project/Core/Startup/startup_stm32f407xx.s",
        ));
        let text = render(Path::new("/home/me/My Project"), &config, config.mcu_params());

        assert!(text.contains("ASM_SOURCES = Core/Startup/startup_stm32f407xx.s\n"));
        assert!(text.contains("LDSCRIPT_DIR = ld\n"));
        assert!(!text.contains("My Project"));
    }

    #[test]
    fn outside_files_stay_absolute() {
        let config = resolved_config();
        let text = render(Path::new("/elsewhere"), &config, config.mcu_params());
        assert!(text.contains("ASM_SOURCES = /w/Core/Startup/startup_stm32f407xx.s\n"));
        assert!(text.contains("LDSCRIPT_DIR = /w\n"));
    }

    #[test]
    fn windows_tools_are_quoted() {
        let mut config = ProjectConfig::defaults(Platform::Windows);
        config.set_startup_file(ResolvedFile::from_path("/w/startup_stm32f407xx.s"));
        let text = render(Path::new("/w"), &config, config.mcu_params());

        assert!(text.contains("GCC_PATH = C:\\Program Files (x86)"));
        assert!(text.contains("CC = \"$(GCC_PATH)/$(PREFIX)gcc\"\n"));
        assert!(text.contains("SZ = \"$(GCC_PATH)/$(PREFIX)size\"\n"));
    }

    #[test]
    fn tools_on_the_path_are_bare() {
        let mut config = resolved_config();
        config.gcc_path = "arm-none-eabi-gcc".into();
        let text = render(Path::new("/w"), &config, config.mcu_params());
        assert!(text.contains("CC = $(PREFIX)gcc\n"));
        assert!(!text.contains("GCC_PATH"));
    }

    #[test]
    fn workspace_folder_in_gcc_path() {
        let mut config = resolved_config();
        config.gcc_path = "${workspaceFolder}/tools/bin/arm-none-eabi-gcc".into();
        let text = render(Path::new("/w"), &config, config.mcu_params());
        assert!(text.contains("GCC_PATH = /w/tools/bin\n"));
        assert!(text.contains("PREFIX = arm-none-eabi-\n"));
    }

    #[test]
    fn stem_of_paths() {
        assert_eq!(file_stem("/a/b/startup_stm32f407xx.s"), "startup_stm32f407xx");
        assert_eq!(file_stem(r"C:\a\startup.s"), "startup");
        assert_eq!(file_stem("startup"), "startup");
    }
}
