use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcu::{self, McuParams};

pub mod intellisense;
pub mod ioc;

pub use ioc::IocDescriptor;

/// Location of the persisted configuration, relative to the workspace root.
pub const CONFIG_FILE: &str = ".vscode/stm32-config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    fn serial_port_pattern(&self) -> &'static str {
        match self {
            Platform::Linux => "/dev/ttyUSB*",
            Platform::MacOs => "/dev/tty.usbserial*",
            Platform::Windows => "COM*",
        }
    }

    fn gcc_path(&self) -> &'static str {
        match self {
            Platform::Linux => "/usr/bin/arm-none-eabi-gcc",
            Platform::MacOs => "/opt/homebrew/bin/arm-none-eabi-gcc",
            Platform::Windows => {
                r"C:\Program Files (x86)\Arm GNU Toolchain arm-none-eabi\bin\arm-none-eabi-gcc.exe"
            }
        }
    }

    fn programmer_path(&self) -> &'static str {
        match self {
            Platform::Linux => {
                "/usr/local/STMicroelectronics/STM32Cube/STM32CubeProgrammer/bin/STM32_Programmer_CLI"
            }
            Platform::MacOs => {
                "/Applications/STMicroelectronics/STM32Cube/STM32CubeProgrammer/STM32CubeProgrammer.app/Contents/MacOs/bin/STM32_Programmer_CLI"
            }
            Platform::Windows => {
                r"C:\Program Files\STMicroelectronics\STM32Cube\STM32CubeProgrammer\bin\STM32_Programmer_CLI.exe"
            }
        }
    }
}

/// A file found in the workspace: basename plus absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub name: String,
    pub path: PathBuf,
}

impl ResolvedFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_string_lossy().to_string();
        Some(Self { name, path })
    }

    pub fn stem(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub project_name: String,
    pub mcu: String,
    pub source_dirs: Vec<String>,
    /// Compiler include search order.
    pub include_dirs: Vec<String>,
    /// Basenames left out of the source list wherever they live.
    pub exclude_files: BTreeSet<String>,
    pub defines: Vec<String>,
    linker_script: Option<ResolvedFile>,
    startup_file: Option<ResolvedFile>,
    pub gcc_path: PathBuf,
    pub programmer_path: PathBuf,
    /// Glob matched against the names of the available serial ports.
    pub serial_port: String,
    pub baud_rate: u32,
    pub auto_update_makefile: bool,
    pub config_initialized: bool,
    pub stack_size: Option<String>,
    pub heap_size: Option<String>,
    pub sysclk_freq: Option<u64>,
}

/// Shape of the JSON file.
///
/// Every key is optional when reading, so a partial file overrides only the
/// fields it names. Keys outside this list are reported and dropped.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverride {
    pub project_name: Option<String>,
    pub mcu: Option<String>,
    pub source_dirs: Option<Vec<String>>,
    pub include_dirs: Option<Vec<String>>,
    pub exclude_files: Option<BTreeSet<String>>,
    pub defines: Option<Vec<String>>,
    pub ldscript: Option<String>,
    pub ldscript_path: Option<PathBuf>,
    pub startup_file: Option<String>,
    pub startup_file_path: Option<PathBuf>,
    pub gcc_path: Option<PathBuf>,
    pub programmer_path: Option<PathBuf>,
    pub serial_port: Option<String>,
    pub baud_rate: Option<u32>,
    pub auto_update_makefile: Option<bool>,
    pub config_initialized: Option<bool>,
    pub stack_size: Option<String>,
    pub heap_size: Option<String>,
    pub sysclk_freq: Option<u64>,
}

const KNOWN_KEYS: &[&str] = &[
    "projectName",
    "mcu",
    "sourceDirs",
    "includeDirs",
    "excludeFiles",
    "defines",
    "ldscript",
    "ldscriptPath",
    "startupFile",
    "startupFilePath",
    "gccPath",
    "programmerPath",
    "serialPort",
    "baudRate",
    "autoUpdateMakefile",
    "configInitialized",
    "stackSize",
    "heapSize",
    "sysclkFreq",
];

impl ConfigOverride {
    /// Parses a JSON object, dropping keys the configuration does not know.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let Value::Object(mut map) = serde_json::from_str::<Value>(content)? else {
            bail!("configuration must be a JSON object");
        };
        map.retain(|key, _| {
            let known = KNOWN_KEYS.contains(&key.as_str());
            if !known {
                warn!("unknown configuration key `{key}` ignored");
            }
            known
        });
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

impl From<&ProjectConfig> for ConfigOverride {
    fn from(config: &ProjectConfig) -> Self {
        let (ldscript, ldscript_path) = split_pair(config.linker_script.as_ref());
        let (startup_file, startup_file_path) = split_pair(config.startup_file.as_ref());
        Self {
            project_name: Some(config.project_name.clone()),
            mcu: Some(config.mcu.clone()),
            source_dirs: Some(config.source_dirs.clone()),
            include_dirs: Some(config.include_dirs.clone()),
            exclude_files: Some(config.exclude_files.clone()),
            defines: Some(config.defines.clone()),
            ldscript,
            ldscript_path,
            startup_file,
            startup_file_path,
            gcc_path: Some(config.gcc_path.clone()),
            programmer_path: Some(config.programmer_path.clone()),
            serial_port: Some(config.serial_port.clone()),
            baud_rate: Some(config.baud_rate),
            auto_update_makefile: Some(config.auto_update_makefile),
            config_initialized: Some(config.config_initialized),
            stack_size: config.stack_size.clone(),
            heap_size: config.heap_size.clone(),
            sysclk_freq: config.sysclk_freq,
        }
    }
}

fn split_pair(file: Option<&ResolvedFile>) -> (Option<String>, Option<PathBuf>) {
    match file {
        Some(f) => (Some(f.name.clone()), Some(f.path.clone())),
        None => (None, None),
    }
}

fn join_pair(key: &str, name: Option<String>, path: Option<PathBuf>) -> Option<ResolvedFile> {
    match (name, path) {
        (Some(name), Some(path)) => Some(ResolvedFile { name, path }),
        (None, None) => None,
        _ => {
            warn!("`{key}` needs both its name and its path, ignoring it");
            None
        }
    }
}

pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_FILE)
}

impl ProjectConfig {
    /// Defaults for a CubeMX generated layout.
    pub fn defaults(platform: Platform) -> Self {
        let series = mcu::series(mcu::DEFAULT_MCU).unwrap_or_else(|| "STM32F4xx".into());
        Self {
            project_name: "firmware".into(),
            mcu: mcu::DEFAULT_MCU.into(),
            source_dirs: vec!["Core/Src".into(), format!("Drivers/{series}_HAL_Driver/Src")],
            include_dirs: vec![
                "Core/Inc".into(),
                format!("Drivers/{series}_HAL_Driver/Inc"),
                format!("Drivers/{series}_HAL_Driver/Inc/Legacy"),
                format!("Drivers/CMSIS/Device/ST/{series}/Include"),
                "Drivers/CMSIS/Include".into(),
            ],
            exclude_files: BTreeSet::new(),
            defines: vec![],
            linker_script: None,
            startup_file: None,
            gcc_path: platform.gcc_path().into(),
            programmer_path: platform.programmer_path().into(),
            serial_port: platform.serial_port_pattern().into(),
            baud_rate: 115200,
            auto_update_makefile: true,
            config_initialized: false,
            stack_size: None,
            heap_size: None,
            sysclk_freq: None,
        }
    }

    /// Reads the workspace configuration over the defaults.
    ///
    /// A missing file gives the defaults. So does an unreadable one, after a
    /// warning: loading never fails.
    pub fn load(workspace: &Path, platform: Platform) -> Self {
        let mut config = Self::defaults(platform);
        let path = config_path(workspace);
        if !path.exists() {
            debug!("no configuration at {}, using defaults", path.display());
            return config;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("can not read {}: {e}, using defaults", path.display());
                return config;
            }
        };

        match ConfigOverride::from_json(&content) {
            Ok(over) => config.merge(over),
            Err(e) => warn!("invalid configuration {}: {e:#}, using defaults", path.display()),
        }
        config
    }

    /// Writes the configuration and regenerates `c_cpp_properties.json` from it.
    pub fn save(&self, workspace: &Path) -> anyhow::Result<()> {
        let path = config_path(workspace);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(&ConfigOverride::from(self))?;
        fs::write(&path, content + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("configuration saved to {}", path.display());

        intellisense::write(workspace, self)?;
        Ok(())
    }

    pub fn merge(&mut self, over: ConfigOverride) {
        if let Some(v) = over.project_name {
            self.project_name = v;
        }
        if let Some(v) = over.mcu {
            self.mcu = v;
        }
        if let Some(v) = over.source_dirs {
            self.source_dirs = v;
        }
        if let Some(v) = over.include_dirs {
            self.include_dirs = v;
        }
        if let Some(v) = over.exclude_files {
            self.exclude_files = v;
        }
        if let Some(v) = over.defines {
            self.defines = v;
        }
        if let Some(v) = join_pair("ldscript", over.ldscript, over.ldscript_path) {
            self.linker_script = Some(v);
        }
        if let Some(v) = join_pair("startupFile", over.startup_file, over.startup_file_path) {
            self.startup_file = Some(v);
        }
        if let Some(v) = over.gcc_path {
            self.gcc_path = v;
        }
        if let Some(v) = over.programmer_path {
            self.programmer_path = v;
        }
        if let Some(v) = over.serial_port {
            self.serial_port = v;
        }
        if let Some(v) = over.baud_rate {
            self.baud_rate = v;
        }
        if let Some(v) = over.auto_update_makefile {
            self.auto_update_makefile = v;
        }
        if let Some(v) = over.config_initialized {
            self.config_initialized = v;
        }
        if over.stack_size.is_some() {
            self.stack_size = over.stack_size;
        }
        if over.heap_size.is_some() {
            self.heap_size = over.heap_size;
        }
        if over.sysclk_freq.is_some() {
            self.sysclk_freq = over.sysclk_freq;
        }
    }

    /// Projects the descriptor keys that are present; everything else is kept.
    pub fn apply_ioc(&mut self, ioc: &IocDescriptor) {
        if let Some(mcu) = ioc.mcu() {
            self.set_mcu(mcu);
        }
        if let Some(name) = ioc.project_name() {
            self.project_name = name.to_string();
        }
        if let Some(size) = ioc.stack_size() {
            self.stack_size = Some(size.to_string());
        }
        if let Some(size) = ioc.heap_size() {
            self.heap_size = Some(size.to_string());
        }
        if let Some(freq) = ioc.sysclk_freq() {
            self.sysclk_freq = Some(freq);
        }
    }

    pub fn mcu_params(&self) -> &'static McuParams {
        mcu::lookup(&self.mcu)
    }

    /// Switches the part. Resolved linker and startup files belong to the old
    /// part, so they are dropped, and HAL/CMSIS directories follow the series.
    pub fn set_mcu(&mut self, new_mcu: &str) {
        if self.mcu == new_mcu {
            return;
        }
        if let (Some(old), Some(new)) = (mcu::series(&self.mcu), mcu::series(new_mcu)) {
            for dir in self.source_dirs.iter_mut().chain(self.include_dirs.iter_mut()) {
                *dir = dir.replace(&old, &new);
            }
        }
        info!("MCU changed from {} to {new_mcu}", self.mcu);
        self.mcu = new_mcu.to_string();
        self.linker_script = None;
        self.startup_file = None;
        self.config_initialized = false;
    }

    pub fn linker_script(&self) -> Option<&ResolvedFile> {
        self.linker_script.as_ref()
    }

    pub fn set_linker_script(&mut self, file: Option<ResolvedFile>) {
        self.linker_script = file;
    }

    pub fn startup_file(&self) -> Option<&ResolvedFile> {
        self.startup_file.as_ref()
    }

    pub fn set_startup_file(&mut self, file: Option<ResolvedFile>) {
        self.startup_file = file;
    }

    /// HAL define, the part define, then the user defines.
    pub fn all_defines(&self) -> Vec<String> {
        let mut defines = vec![
            mcu::HAL_DEFINE.to_string(),
            self.mcu_params().define.to_string(),
        ];
        for define in &self.defines {
            if !defines.contains(define) {
                defines.push(define.clone());
            }
        }
        defines
    }
}
