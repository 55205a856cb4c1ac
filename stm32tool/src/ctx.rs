use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;

use crate::{
    config::{self, IocDescriptor, Platform, ProjectConfig, ResolvedFile, ioc},
    makefile::{self, Freshness},
    resolve::{self, ResolveReport},
    utils::{self, Command},
};

/// Single-value settings that can be changed from the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Setting {
    Mcu,
    ProjectName,
    SerialPort,
    BaudRate,
    Ldscript,
    Startup,
    GccPath,
    ProgrammerPath,
    AutoUpdate,
}

/// List settings, edited one entry at a time.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListSetting {
    SourceDir,
    IncludeDir,
    Exclude,
    Define,
}

/// Owns the workspace configuration. Every change goes through [`AppContext::save`].
#[derive(Debug, Clone)]
pub struct AppContext {
    pub workspace: PathBuf,
    pub platform: Platform,
    pub config: ProjectConfig,
    /// Outcome of the linker/startup search done while opening.
    pub resolve_report: ResolveReport,
}

impl AppContext {
    /// Loads the configuration, applies the `.ioc` descriptor (`ioc` or the
    /// one found in the root), fills missing linker and startup files and
    /// saves the configuration when any of that changed something.
    ///
    /// The Makefile is left alone, so `check` still sees what is on disk;
    /// commands that change settings regenerate it through [`Self::save`].
    pub fn open(workspace: &Path, ioc: Option<&Path>) -> anyhow::Result<Self> {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("workspace {} not found", workspace.display()))?;
        let platform = Platform::current();
        let config = ProjectConfig::load(&workspace, platform);
        let loaded = config.clone();

        let mut ctx = Self {
            workspace,
            platform,
            config,
            resolve_report: ResolveReport::default(),
        };

        let descriptor = match ioc {
            Some(path) => Some(IocDescriptor::load(path)?),
            None => ioc::load_descriptor(&ctx.workspace),
        };
        if let Some(descriptor) = &descriptor {
            ctx.config.apply_ioc(descriptor);
        }

        ctx.resolve_report = resolve::resolve_missing(&ctx.workspace, &mut ctx.config, false);

        if ctx.config != loaded || !config::config_path(&ctx.workspace).exists() {
            ctx.config.save(&ctx.workspace)?;
        }
        Ok(ctx)
    }

    /// Drops the in-memory configuration and reads the file again.
    pub fn reload(&mut self) {
        self.config = ProjectConfig::load(&self.workspace, self.platform);
    }

    /// Persists the configuration, regenerates IntelliSense and, with
    /// `autoUpdateMakefile`, the Makefile.
    pub fn save(&mut self) -> anyhow::Result<()> {
        self.config.save(&self.workspace)?;
        if self.config.auto_update_makefile {
            self.generate_makefile()?;
        }
        Ok(())
    }

    pub fn render_makefile(&self) -> String {
        makefile::render(&self.workspace, &self.config, self.config.mcu_params())
    }

    pub fn generate_makefile(&self) -> anyhow::Result<()> {
        makefile::write(&self.workspace, &self.render_makefile())
    }

    pub fn check_makefile(&self) -> Freshness {
        makefile::check_freshness(&self.workspace, &self.config, self.config.mcu_params())
    }

    pub fn resolve(&mut self, force: bool) -> anyhow::Result<ResolveReport> {
        let report = resolve::resolve_missing(&self.workspace, &mut self.config, force);
        self.resolve_report = report.clone();
        self.save()?;
        Ok(report)
    }

    pub fn sources(&self) -> Vec<String> {
        makefile::collect_sources(&self.workspace, &self.config)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.workspace.join(makefile::BUILD_DIR)
    }

    pub fn elf_path(&self) -> PathBuf {
        self.build_dir().join(format!("{}.elf", self.config.project_name))
    }

    pub fn bin_path(&self) -> PathBuf {
        self.build_dir().join(format!("{}.bin", self.config.project_name))
    }

    /// `gccPath` with `${workspaceFolder}` expanded.
    pub fn gcc_path(&self) -> PathBuf {
        self.expand(&self.config.gcc_path)
    }

    /// `programmerPath` with `${workspaceFolder}` expanded.
    pub fn programmer_path(&self) -> PathBuf {
        self.expand(&self.config.programmer_path)
    }

    fn expand(&self, path: &Path) -> PathBuf {
        utils::expand_workspace_folder(&path.to_string_lossy(), &self.workspace).into()
    }

    pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
        Command::new(program, &self.workspace)
    }

    /// A file given on the command line, relative to the workspace unless absolute.
    fn workspace_file(&self, value: &str) -> anyhow::Result<ResolvedFile> {
        let path = self.workspace.join(value);
        if !path.is_file() {
            bail!("{} does not exist", path.display());
        }
        ResolvedFile::from_path(path).ok_or_else(|| anyhow!("invalid file name: {value}"))
    }

    pub fn set(&mut self, setting: Setting, value: &str) -> anyhow::Result<()> {
        match setting {
            Setting::Mcu => {
                self.config.set_mcu(value);
                self.resolve_report =
                    resolve::resolve_missing(&self.workspace, &mut self.config, false);
            }
            Setting::ProjectName => self.config.project_name = value.to_string(),
            Setting::SerialPort => self.config.serial_port = value.to_string(),
            Setting::BaudRate => {
                self.config.baud_rate = value
                    .parse()
                    .with_context(|| format!("invalid baud rate: {value}"))?;
            }
            Setting::Ldscript => {
                let file = self.workspace_file(value)?;
                self.config.set_linker_script(Some(file));
            }
            Setting::Startup => {
                let file = self.workspace_file(value)?;
                self.config.set_startup_file(Some(file));
            }
            Setting::GccPath => self.config.gcc_path = value.into(),
            Setting::ProgrammerPath => self.config.programmer_path = value.into(),
            Setting::AutoUpdate => {
                self.config.auto_update_makefile = value
                    .parse()
                    .with_context(|| format!("expected true or false, got {value}"))?;
            }
        }
        self.save()
    }

    /// Appends `value`; returns false when it was already present.
    pub fn add(&mut self, list: ListSetting, value: &str) -> anyhow::Result<bool> {
        let value = value.to_string();
        let added = match list {
            ListSetting::Exclude => self.config.exclude_files.insert(value),
            ListSetting::SourceDir => push_unique(&mut self.config.source_dirs, value),
            ListSetting::IncludeDir => push_unique(&mut self.config.include_dirs, value),
            ListSetting::Define => push_unique(&mut self.config.defines, value),
        };
        if added {
            self.save()?;
        }
        Ok(added)
    }

    /// Removes `value`; returns false when it was not present.
    pub fn remove(&mut self, list: ListSetting, value: &str) -> anyhow::Result<bool> {
        let removed = match list {
            ListSetting::Exclude => self.config.exclude_files.remove(value),
            ListSetting::SourceDir => remove_item(&mut self.config.source_dirs, value),
            ListSetting::IncludeDir => remove_item(&mut self.config.include_dirs, value),
            ListSetting::Define => remove_item(&mut self.config.defines, value),
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }
}

fn push_unique(list: &mut Vec<String>, value: String) -> bool {
    if list.contains(&value) {
        return false;
    }
    list.push(value);
    true
}

fn remove_item(list: &mut Vec<String>, value: &str) -> bool {
    let len = list.len();
    list.retain(|item| item != value);
    list.len() != len
}
