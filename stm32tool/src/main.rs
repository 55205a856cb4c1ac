use std::{
    env::current_dir,
    fs,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::Result;
use byte_unit::Byte;
use clap::*;
use colored::Colorize;
use log::LevelFilter;
use stm32tool::{
    config::ioc,
    ctx::{AppContext, ListSetting, Setting},
    resolve::{Resolution, ResolveReport},
    run::{self, BuildArgs, FlashArgs, MonitorArgs},
    ui,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Workspace root, defaults to the current directory
    #[arg(short, long)]
    workdir: Option<PathBuf>,
    /// CubeMX descriptor to apply instead of the one in the workspace root
    #[arg(long)]
    ioc: Option<PathBuf>,
    /// More logging, repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: SubCommands,
}

#[derive(Subcommand)]
enum SubCommands {
    /// Create the configuration and generate the Makefile
    Init,
    /// Show the configuration and the MCU parameters
    Info,
    /// Regenerate the Makefile
    Generate,
    /// Check that the Makefile matches the configuration
    Check,
    /// List the C files the Makefile will compile
    Sources,
    /// Search the linker script and startup file again
    Resolve {
        /// Also replace files that are already set
        #[arg(long)]
        force: bool,
    },
    /// Change a setting
    Set { key: Setting, value: String },
    /// Add an entry to a list setting
    Add { list: ListSetting, value: String },
    /// Remove an entry from a list setting
    Remove { list: ListSetting, value: String },
    Build(BuildArgs),
    Flash(FlashArgs),
    Monitor(MonitorArgs),
    /// List the serial ports
    Ports,
    /// Delete the build output
    Clean,
}

/// `-v` sets the level, `RUST_LOG` overrides it.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// An explicit `--ioc`, or an interactive choice when the root holds several.
fn choose_descriptor(workdir: &Path, ioc: Option<PathBuf>) -> Result<Option<PathBuf>> {
    if ioc.is_some() {
        return Ok(ioc);
    }
    let mut found = ioc::find_descriptors(workdir);
    if found.len() < 2 || !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let names: Vec<String> = found
        .iter()
        .map(|p| p.file_name().unwrap_or_default().to_string_lossy().to_string())
        .collect();
    let i = ui::shell_select("Several .ioc files found, select one:", &names)?;
    Ok(Some(found.swap_remove(i)))
}

fn print_resolve_hints(report: &ResolveReport) {
    if report.linker_script == Resolution::Missing {
        println!(
            "{}",
            "warn: no linker script found, use `stm32tool set ldscript <file>`".yellow()
        );
    }
    if report.startup_file == Resolution::Missing {
        println!(
            "{}",
            "warn: no startup file found, use `stm32tool set startup <file>`".yellow()
        );
    }
}

fn kib(size: u32) -> String {
    format!("{:#}", Byte::from_u64(u64::from(size) * 1024))
}

fn print_info(ctx: &AppContext) {
    let config = &ctx.config;
    let params = config.mcu_params();
    let none = "<not found>".yellow().to_string();

    println!("{:<12}{}", "Workspace:", ctx.workspace.display());
    println!("{:<12}{}", "Project:", config.project_name.bold());
    println!("{:<12}{} ({})", "MCU:", config.mcu.bold(), params.define);
    println!(
        "{:<12}{} {} {}",
        "Flags:",
        params.cpu_flag(),
        params.fpu_flag().unwrap_or_default(),
        params.float_abi_flag()
    );
    let mut memory = format!("flash {}, RAM {}", kib(params.memory.flash), kib(params.memory.ram));
    if params.memory.ccm_ram > 0 {
        memory += &format!(", CCM {}", kib(params.memory.ccm_ram));
    }
    println!("{:<12}{memory}", "Memory:");
    if let Some(freq) = config.sysclk_freq {
        println!("{:<12}{} MHz", "SYSCLK:", freq / 1_000_000);
    }
    match config.linker_script() {
        Some(ld) => println!("{:<12}{}", "Linker:", ld.path.display()),
        None => println!("{:<12}{none}", "Linker:"),
    }
    match config.startup_file() {
        Some(s) => println!("{:<12}{}", "Startup:", s.path.display()),
        None => println!("{:<12}{none}", "Startup:"),
    }
    println!("{:<12}{}", "Compiler:", config.gcc_path.display());
    println!("{:<12}{}", "Programmer:", config.programmer_path.display());
    println!("{:<12}{} @ {}", "Serial:", config.serial_port, config.baud_rate);
    println!("{:<12}{}", "Defines:", config.all_defines().join(" "));
}

fn print_list_change(changed: bool, action: &str, value: &str) {
    if changed {
        println!("{}", format!("{action} {value}").green());
    } else {
        println!("{}", format!("nothing to do for {value}").yellow());
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => current_dir()?,
    };
    let ioc = choose_descriptor(&workdir, cli.ioc)?;
    let mut ctx = AppContext::open(&workdir, ioc.as_deref())?;

    match cli.command {
        SubCommands::Init => {
            ctx.save()?;
            if !ctx.config.auto_update_makefile {
                ctx.generate_makefile()?;
            }
            print_resolve_hints(&ctx.resolve_report);
            println!(
                "{}",
                format!("Initialized {} for {}", ctx.config.project_name, ctx.config.mcu).green()
            );
        }
        SubCommands::Info => {
            print_info(&ctx);
            print_resolve_hints(&ctx.resolve_report);
        }
        SubCommands::Generate => {
            ctx.generate_makefile()?;
            print_resolve_hints(&ctx.resolve_report);
            println!("{}", "Makefile generated".green());
        }
        SubCommands::Check => {
            let freshness = ctx.check_makefile();
            if let Some(details) = freshness.details {
                println!("{}", "Makefile is out of date".yellow());
                println!("{details}");
                exit(1);
            }
            println!("{}", "Makefile is up to date".green());
        }
        SubCommands::Sources => {
            for source in ctx.sources() {
                println!("{source}");
            }
        }
        SubCommands::Resolve { force } => {
            let report = ctx.resolve(force)?;
            for (what, res) in [
                ("linker script", &report.linker_script),
                ("startup file", &report.startup_file),
            ] {
                match res {
                    Resolution::Found(file) => {
                        println!("{what}: {}", file.path.display().to_string().green())
                    }
                    Resolution::Kept => println!("{what}: unchanged"),
                    Resolution::Missing => {}
                }
            }
            print_resolve_hints(&report);
        }
        SubCommands::Set { key, value } => {
            ctx.set(key, &value)?;
            if key == Setting::Mcu {
                print_resolve_hints(&ctx.resolve_report);
            }
            let name = key
                .to_possible_value()
                .map(|v| v.get_name().to_string())
                .unwrap_or_default();
            println!("{}", format!("{name} = {value}").green());
        }
        SubCommands::Add { list, value } => {
            let added = ctx.add(list, &value)?;
            print_list_change(added, "added", &value);
        }
        SubCommands::Remove { list, value } => {
            let removed = ctx.remove(list, &value)?;
            print_list_change(removed, "removed", &value);
        }
        SubCommands::Build(args) => run::run_build(&ctx, &args)?,
        SubCommands::Flash(args) => run::run_flash(&ctx, &args)?,
        SubCommands::Monitor(args) => run::run_monitor(&ctx, &args)?,
        SubCommands::Ports => {
            let ports = run::monitor::available_ports()?;
            let matching = run::monitor::matching_ports(&ctx.config.serial_port, &ports)?;
            if ports.is_empty() {
                println!("{}", "no serial ports".yellow());
            }
            for port in ports {
                if matching.contains(&port) {
                    println!("{}", port.green());
                } else {
                    println!("{port}");
                }
            }
        }
        SubCommands::Clean => {
            let dir = ctx.build_dir();
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                println!("{}", format!("removed {}", dir.display()).green());
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run_cli(cli) {
        eprintln!("{}", format!("error: {e:#}").red());
        exit(1);
    }
}
