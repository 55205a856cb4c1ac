use std::{
    env,
    ffi::OsStr,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use anyhow::bail;
use colored::Colorize;

/// `std::process::Command` running in the workspace, echoing itself before
/// it starts and expanding `${workspaceFolder}` in arguments.
pub struct Command {
    inner: std::process::Command,
    workdir: PathBuf,
}

impl Deref for Command {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Command {
    pub fn new<S>(program: S, workdir: &Path) -> Command
    where
        S: AsRef<OsStr>,
    {
        let program = expand_workspace_folder(&program.as_ref().to_string_lossy(), workdir);
        let mut cmd = std::process::Command::new(program);
        cmd.current_dir(workdir);

        Self {
            workdir: workdir.to_path_buf(),
            inner: cmd,
        }
    }

    pub fn cmd_line(&self) -> String {
        let mut cmd_str = self.get_program().to_string_lossy().to_string();

        for arg in self.get_args() {
            cmd_str += " ";
            cmd_str += arg.to_string_lossy().as_ref();
        }
        cmd_str
    }

    pub fn print_cmd(&self) {
        println!("{}", self.cmd_line().purple().bold());
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        self.print_cmd();
        let status = self.status()?;
        if !status.success() {
            bail!("failed with status: {status}");
        }
        Ok(())
    }

    pub fn arg<S>(&mut self, arg: S) -> &mut Command
    where
        S: AsRef<OsStr>,
    {
        let arg = expand_workspace_folder(&arg.as_ref().to_string_lossy(), &self.workdir);
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }
}

/// Replaces the VSCode `${workspaceFolder}` variable, so tool paths in the
/// configuration can point into the workspace.
pub fn expand_workspace_folder(value: &str, workdir: &Path) -> String {
    value.replace("${workspaceFolder}", &workdir.display().to_string())
}

/// Locates a tool: a path containing a separator must exist as given,
/// a bare name is looked up in `PATH`.
pub fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = candidate.with_extension(env::consts::EXE_EXTENSION);
        exe.is_file().then_some(exe)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_folder_is_expanded() {
        let mut cmd = Command::new("make", Path::new("/work/blinky"));
        cmd.arg("-C").arg("${workspaceFolder}/build");
        assert_eq!(cmd.cmd_line(), "make -C /work/blinky/build");
    }

    #[test]
    fn program_path_is_expanded() {
        let cmd = Command::new("${workspaceFolder}/tools/make", Path::new("/work/blinky"));
        assert_eq!(cmd.cmd_line(), "/work/blinky/tools/make");
    }

    #[test]
    fn missing_program() {
        assert_eq!(find_program(Path::new("/no/such/dir/arm-none-eabi-gcc")), None);
        assert_eq!(find_program(Path::new("stm32tool-no-such-program")), None);
    }
}
