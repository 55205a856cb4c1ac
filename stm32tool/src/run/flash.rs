use std::path::{Path, PathBuf};

use clap::Args;
use colored::Colorize;

use crate::{ctx::AppContext, makefile::FLASH_ADDRESS, utils::find_program};

#[derive(Args, Debug, Clone)]
pub struct FlashArgs {
    /// Image to program, defaults to build/<project>.bin
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Programmer connection port
    #[arg(long, default_value = "SWD")]
    pub port: String,
    /// Start address for .bin images
    #[arg(long, default_value = FLASH_ADDRESS)]
    pub address: String,
    /// Skip verification after programming
    #[arg(long)]
    pub no_verify: bool,
    /// Leave the target halted after programming
    #[arg(long)]
    pub no_reset: bool,
}

impl Default for FlashArgs {
    fn default() -> Self {
        Self {
            file: None,
            port: "SWD".into(),
            address: FLASH_ADDRESS.into(),
            no_verify: false,
            no_reset: false,
        }
    }
}

/// Arguments for `STM32_Programmer_CLI`. Only raw `.bin` images take an address.
pub fn programmer_args(args: &FlashArgs, image: &Path) -> Vec<String> {
    let mut out = vec![
        "-c".to_string(),
        format!("port={}", args.port),
        "-w".to_string(),
        image.display().to_string(),
    ];
    let is_bin = image
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
    if is_bin {
        out.push(args.address.clone());
    }
    if !args.no_verify {
        out.push("-v".into());
    }
    if !args.no_reset {
        out.push("-rst".into());
    }
    out
}

pub fn run_flash(ctx: &AppContext, args: &FlashArgs) -> anyhow::Result<()> {
    let configured = ctx.programmer_path();
    let programmer = find_program(&configured).ok_or_else(|| {
        anyhow!(
            "STM32_Programmer_CLI not found at {}, use `stm32tool set programmer-path <path>`",
            configured.display()
        )
    })?;

    let image = match &args.file {
        Some(file) => ctx.workspace.join(file),
        None => ctx.bin_path(),
    };
    if !image.is_file() {
        bail!(
            "{} not found, run `stm32tool build` first",
            image.display()
        );
    }

    ctx.command(&programmer)
        .args(programmer_args(args, &image))
        .run()?;
    println!("{}", "Flash finished".green());
    Ok(())
}
