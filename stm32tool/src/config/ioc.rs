//! STM32CubeMX project descriptors (`*.ioc`).
//!
//! The format is one `key=value` per line with `#` comments. Only the root
//! of the workspace is searched.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

pub const IOC_EXTENSION: &str = "ioc";

const KEY_MCU_USER_NAME: &str = "Mcu.UserName";
const KEY_MCU_NAME: &str = "Mcu.Name";
const KEY_PROJECT_NAME: &str = "ProjectManager.ProjectName";
const KEY_STACK_SIZE: &str = "ProjectManager.StackSize";
const KEY_HEAP_SIZE: &str = "ProjectManager.HeapSize";
const KEY_SYSCLK: &str = "RCC.SYSCLKFreq_VALUE";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IocDescriptor {
    values: BTreeMap<String, String>,
}

impl IocDescriptor {
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                trace!("skip ioc line without `=`: {line}");
                continue;
            };
            values.insert(key.trim().to_string(), value.trim().replace("\\:", ":"));
        }
        Self { values }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("can not read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Value of `key`, `None` when missing or empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `Mcu.Name` holds a pattern such as `STM32F407V(E-G)Tx`, so it is only
    /// used when it names a single part.
    pub fn mcu(&self) -> Option<&str> {
        self.get(KEY_MCU_USER_NAME).or_else(|| {
            self.get(KEY_MCU_NAME)
                .filter(|name| !name.contains(['(', ')']))
        })
    }

    pub fn project_name(&self) -> Option<&str> {
        self.get(KEY_PROJECT_NAME)
    }

    pub fn stack_size(&self) -> Option<&str> {
        self.get(KEY_STACK_SIZE)
    }

    pub fn heap_size(&self) -> Option<&str> {
        self.get(KEY_HEAP_SIZE)
    }

    pub fn sysclk_freq(&self) -> Option<u64> {
        self.get(KEY_SYSCLK)?.parse().ok()
    }
}

/// `*.ioc` files in the workspace root, sorted by name.
pub fn find_descriptors(workspace: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(workspace) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("can not list {}: {e}", workspace.display());
            return vec![];
        }
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(IOC_EXTENSION))
        })
        .collect();
    found.sort();
    found
}

/// Loads the descriptor of the workspace, if there is one.
///
/// With several descriptors the first by name is used and the others are
/// reported; pass an explicit file to [`IocDescriptor::load`] to choose.
pub fn load_descriptor(workspace: &Path) -> Option<IocDescriptor> {
    let found = find_descriptors(workspace);
    let first = found.first()?;
    if found.len() > 1 {
        let names = found
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            "several .ioc files found ({names}), using {}",
            first.display()
        );
    }
    match IocDescriptor::load(first) {
        Ok(ioc) => Some(ioc),
        Err(e) => {
            warn!("{e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#MicroXplorer Configuration settings - do not modify
File.Version=6
Mcu.Family=STM32F4
Mcu.Name=STM32F407V(E-G)Tx
Mcu.UserName=STM32F407VGTx
ProjectManager.ProjectName=blinky
ProjectManager.StackSize=0x400
ProjectManager.HeapSize=0x200
ProjectManager.ProjectFileName=blinky.ioc
ProjectManager.CustomerFirmwarePackage=
RCC.SYSCLKFreq_VALUE=168000000
PA5.GPIO_Label=LED
ProjectManager.ToolChainLocation=C\:\\Users\\dev
not a key value line
"#;

    #[test]
    fn parse_sample() {
        let ioc = IocDescriptor::parse(SAMPLE);
        assert_eq!(ioc.mcu(), Some("STM32F407VGTx"));
        assert_eq!(ioc.project_name(), Some("blinky"));
        assert_eq!(ioc.stack_size(), Some("0x400"));
        assert_eq!(ioc.heap_size(), Some("0x200"));
        assert_eq!(ioc.sysclk_freq(), Some(168_000_000));
        assert_eq!(ioc.get("PA5.GPIO_Label"), Some("LED"));
        assert_eq!(ioc.get("ProjectManager.CustomerFirmwarePackage"), None);
        assert_eq!(
            ioc.get("ProjectManager.ToolChainLocation"),
            Some("C:\\\\Users\\\\dev")
        );
        assert_eq!(ioc.len(), 12);
    }

    #[test]
    fn mcu_name_pattern_is_not_a_part() {
        let ioc = IocDescriptor::parse("Mcu.Name=STM32F407V(E-G)Tx\n");
        assert_eq!(ioc.mcu(), None);
        let ioc = IocDescriptor::parse("Mcu.Name=STM32F103C8Tx\n");
        assert_eq!(ioc.mcu(), Some("STM32F103C8Tx"));
    }

    #[test]
    fn empty_text() {
        let ioc = IocDescriptor::parse("# only a comment\n\n");
        assert!(ioc.is_empty());
        assert_eq!(ioc.mcu(), None);
    }
}
