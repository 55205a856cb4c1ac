//! `.vscode/c_cpp_properties.json` for the C/C++ extension.

use std::{fs, path::Path};

use anyhow::Context;
use serde_json::{Value, json};

use super::ProjectConfig;

pub const INTELLISENSE_FILE: &str = ".vscode/c_cpp_properties.json";

pub fn render(config: &ProjectConfig) -> Value {
    let include_path: Vec<String> = config
        .include_dirs
        .iter()
        .map(|dir| format!("${{workspaceFolder}}/{dir}"))
        .collect();

    json!({
        "configurations": [{
            "name": "STM32",
            "includePath": include_path,
            "defines": config.all_defines(),
            "compilerPath": config.gcc_path,
            "cStandard": "c11",
            "cppStandard": "c++17",
            "intelliSenseMode": "gcc-arm",
        }],
        "version": 4,
    })
}

pub fn write(workspace: &Path, config: &ProjectConfig) -> anyhow::Result<()> {
    let path = workspace.join(INTELLISENSE_FILE);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let content = serde_json::to_string_pretty(&render(config))?;
    fs::write(&path, content + "\n")
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!("IntelliSense configuration written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;

    #[test]
    fn include_order_and_defines() {
        let mut config = ProjectConfig::defaults(Platform::Linux);
        config.include_dirs = vec!["Core/Inc".into(), "Lib/Inc".into()];
        config.defines = vec!["DEBUG".into()];

        let value = render(&config);
        let cfg = &value["configurations"][0];
        assert_eq!(
            cfg["includePath"],
            json!(["${workspaceFolder}/Core/Inc", "${workspaceFolder}/Lib/Inc"])
        );
        assert_eq!(cfg["defines"], json!(["USE_HAL_DRIVER", "STM32F407xx", "DEBUG"]));
        assert_eq!(cfg["compilerPath"], json!("/usr/bin/arm-none-eabi-gcc"));
        assert_eq!(value["version"], json!(4));
    }
}
