//! Finds the linker script and the startup assembly of a workspace.
//!
//! Searches only read the file system and walk it in file name order, so
//! repeated calls on an unchanged tree give the same answer.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use walkdir::{DirEntry, WalkDir};

use crate::{
    config::{ProjectConfig, ResolvedFile},
    mcu::{self, McuParams},
};

/// Tried in order; earlier patterns rank first.
pub const LINKER_PATTERNS: &[&str] = &["*_FLASH.ld", "*FLASH*.ld"];

/// Directories probed for `<startup>.s` before searching the whole tree.
pub const STARTUP_DIRS: &[&str] = &["Core/Startup", "Startup", "startup", "."];

pub const STARTUP_PATTERNS: &[&str] = &["startup*.s"];

/// Output and tool directories never worth searching.
const SKIP_DIRS: &[&str] = &["build", "node_modules", "target"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already set, search skipped.
    #[default]
    Kept,
    Found(ResolvedFile),
    /// Nothing matched; the user has to pick the file.
    Missing,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    pub linker_script: Resolution,
    pub startup_file: Resolution,
}

impl ResolveReport {
    pub fn changed(&self) -> bool {
        matches!(self.linker_script, Resolution::Found(_))
            || matches!(self.startup_file, Resolution::Found(_))
    }

    pub fn is_complete(&self) -> bool {
        self.linker_script != Resolution::Missing && self.startup_file != Resolution::Missing
    }
}

fn skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

fn workspace_files(workspace: &Path) -> Vec<PathBuf> {
    WalkDir::new(workspace)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn matchers(patterns: &[&str]) -> anyhow::Result<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|p| {
            Ok(GlobBuilder::new(p)
                .case_insensitive(true)
                .build()?
                .compile_matcher())
        })
        .collect()
}

/// Files whose name matches one of `patterns`, grouped by pattern order.
pub fn search(workspace: &Path, patterns: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    let matchers = matchers(patterns)?;
    let files = workspace_files(workspace);
    let mut found: Vec<PathBuf> = vec![];
    for matcher in &matchers {
        for file in &files {
            let Some(name) = file.file_name() else {
                continue;
            };
            if matcher.is_match(name) && !found.contains(file) {
                found.push(file.clone());
            }
        }
    }
    Ok(found)
}

fn resolved(path: PathBuf) -> Option<ResolvedFile> {
    let path = std::path::absolute(&path).unwrap_or(path);
    ResolvedFile::from_path(path)
}

fn file_name_upper(path: &Path) -> String {
    file_name_lower(path).to_uppercase()
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Picks the linker script for `mcu`: the CubeMX name for the part, then any
/// script naming its family and variant, then the first match.
pub fn find_linker_script(workspace: &Path, mcu: &str) -> Option<ResolvedFile> {
    let candidates = match search(workspace, LINKER_PATTERNS) {
        Ok(found) => found,
        Err(e) => {
            warn!("linker script search failed: {e}");
            return None;
        }
    };
    if candidates.is_empty() {
        debug!("no linker script under {}", workspace.display());
        return None;
    }

    let expected = mcu::expected_linker_script(mcu).map(|n| n.to_uppercase());
    let stem = mcu::family_variant(mcu);
    debug!("expected linker script {expected:?}, stem {stem:?}");

    let exact = expected
        .as_ref()
        .and_then(|expected| candidates.iter().find(|p| &file_name_upper(p) == expected));
    let similar = || {
        stem.as_ref()
            .and_then(|stem| candidates.iter().find(|p| file_name_upper(p).contains(stem)))
    };
    let chosen = exact.or_else(similar).unwrap_or(&candidates[0]);
    resolved(chosen.clone())
}

/// Picks the startup assembly: `<startup>.s` in a conventional directory,
/// otherwise the `startup*.s` file mentioning the part, otherwise the first.
pub fn find_startup_file(workspace: &Path, params: &McuParams) -> Option<ResolvedFile> {
    let name = params.startup_file_name();
    for dir in STARTUP_DIRS {
        let base = match *dir {
            "." => workspace.to_path_buf(),
            dir => workspace.join(dir),
        };
        let path = base.join(&name);
        if path.is_file() {
            return resolved(path);
        }
    }

    let candidates = match search(workspace, STARTUP_PATTERNS) {
        Ok(found) => found,
        Err(e) => {
            warn!("startup file search failed: {e}");
            return None;
        }
    };
    let startup = params.startup.to_lowercase();
    let define = params.define.to_lowercase();
    let chosen = candidates
        .iter()
        .find(|p| {
            let name = file_name_lower(p);
            name.contains(&startup) || name.contains(&define)
        })
        .or(candidates.first())?;
    resolved(chosen.clone())
}

/// Fills the linker script and startup file that are not set yet.
/// With `force` both are searched again.
pub fn resolve_missing(
    workspace: &Path,
    config: &mut ProjectConfig,
    force: bool,
) -> ResolveReport {
    let mut report = ResolveReport::default();

    if force || config.linker_script().is_none() {
        report.linker_script = match find_linker_script(workspace, &config.mcu) {
            Some(found) => {
                info!("linker script: {}", found.path.display());
                config.set_linker_script(Some(found.clone()));
                Resolution::Found(found)
            }
            // a forced search that finds nothing keeps what was set
            None if config.linker_script().is_some() => {
                warn!("no linker script found, keeping the configured one");
                Resolution::Kept
            }
            None => Resolution::Missing,
        };
    }

    if force || config.startup_file().is_none() {
        report.startup_file = match find_startup_file(workspace, config.mcu_params()) {
            Some(found) => {
                info!("startup file: {}", found.path.display());
                config.set_startup_file(Some(found.clone()));
                Resolution::Found(found)
            }
            None if config.startup_file().is_some() => {
                warn!("no startup file found, keeping the configured one");
                Resolution::Kept
            }
            None => Resolution::Missing,
        };
    }

    config.config_initialized = true;
    report
}
