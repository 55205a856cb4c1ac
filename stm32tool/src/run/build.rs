use std::{fs, path::Path, thread};

use byte_unit::Byte;
use clap::Args;
use colored::Colorize;
use object::{Object, ObjectSection, SectionKind};

use crate::{ctx::AppContext, mcu::MemorySize, utils::find_program};

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Run `make clean` first
    #[arg(long)]
    pub clean: bool,
    /// Parallel make jobs, defaults to the number of CPUs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Bytes of an ELF image that end up in flash and in RAM.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub flash: u64,
    pub ram: u64,
}

impl MemoryUsage {
    pub fn from_elf(data: &[u8]) -> anyhow::Result<Self> {
        let file = object::File::parse(data)?;
        let mut usage = MemoryUsage::default();
        for section in file.sections() {
            let size = section.size();
            match section.kind() {
                SectionKind::Text
                | SectionKind::ReadOnlyData
                | SectionKind::ReadOnlyDataWithRel
                | SectionKind::ReadOnlyString => usage.flash += size,
                // initial values are copied from flash at reset
                SectionKind::Data | SectionKind::Tls => {
                    usage.flash += size;
                    usage.ram += size;
                }
                SectionKind::UninitializedData | SectionKind::UninitializedTls => {
                    usage.ram += size
                }
                _ => {}
            }
        }
        Ok(usage)
    }
}

fn usage_line(name: &str, used: u64, total_kib: u32) -> String {
    let total = u64::from(total_kib) * 1024;
    let used_str = format!("{:#}", Byte::from_u64(used));
    if total == 0 {
        return format!("{name:>6}: {used_str}");
    }
    let percent = used as f64 * 100.0 / total as f64;
    let line = format!(
        "{name:>6}: {used_str} / {:#} ({percent:.1}%)",
        Byte::from_u64(total)
    );
    if used > total {
        line.red().to_string()
    } else if percent > 90.0 {
        line.yellow().to_string()
    } else {
        line
    }
}

fn print_usage(elf: &Path, memory: &MemorySize) -> anyhow::Result<()> {
    let data = fs::read(elf)?;
    let usage = MemoryUsage::from_elf(&data)?;
    println!("{}", format!("{}:", elf.display()).bold());
    println!("{}", usage_line("Flash", usage.flash, memory.flash));
    println!("{}", usage_line("RAM", usage.ram, memory.ram));
    Ok(())
}

/// Regenerates a stale Makefile (or warns when auto update is off), then runs `make`.
pub fn run_build(ctx: &AppContext, args: &BuildArgs) -> anyhow::Result<()> {
    let freshness = ctx.check_makefile();
    if !freshness.up_to_date {
        if ctx.config.auto_update_makefile {
            info!("Makefile is stale, regenerating");
            ctx.generate_makefile()?;
        } else if let Some(details) = &freshness.details {
            println!(
                "{}",
                format!("warn: Makefile does not match the configuration\n{details}").yellow()
            );
        }
    }

    if ctx.config.linker_script().is_none() {
        bail!("no linker script configured, use `stm32tool set ldscript <file>`");
    }
    let gcc = ctx.gcc_path();
    if find_program(&gcc).is_none() {
        bail!(
            "arm-none-eabi-gcc not found at {}, use `stm32tool set gcc-path <path>`",
            gcc.display()
        );
    }

    if args.clean {
        ctx.command("make").arg("clean").run()?;
    }

    let jobs = args
        .jobs
        .or_else(|| thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);
    ctx.command("make")
        .arg(format!("-j{jobs}"))
        .arg("all")
        .run()?;

    let elf = ctx.elf_path();
    if let Err(e) = print_usage(&elf, &ctx.config.mcu_params().memory) {
        warn!("can not read {}: {e}", elf.display());
    }
    println!("{}", "Build finished".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use object::{
        Architecture, BinaryFormat, Endianness,
        write::{Object as WriteObject, StandardSection},
    };

    use super::*;

    #[test]
    fn counts_flash_and_ram() {
        let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::Arm, Endianness::Little);
        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &[0u8; 1000], 4);
        let rodata = obj.section_id(StandardSection::ReadOnlyData);
        obj.append_section_data(rodata, &[0u8; 200], 4);
        let data = obj.section_id(StandardSection::Data);
        obj.append_section_data(data, &[0u8; 24], 4);
        let bss = obj.section_id(StandardSection::UninitializedData);
        obj.append_section_bss(bss, 4096, 4);
        let bytes = obj.write().unwrap();

        let usage = MemoryUsage::from_elf(&bytes).unwrap();
        assert_eq!(usage.flash, 1224);
        assert_eq!(usage.ram, 4120);
    }

    #[test]
    fn not_an_elf() {
        assert!(MemoryUsage::from_elf(b"not an elf").is_err());
    }

    #[test]
    fn usage_percent() {
        let line = usage_line("RAM", 10, 0);
        assert!(line.contains("RAM"));
        let line = usage_line("Flash", 512 * 1024, 1024);
        assert!(line.ends_with("(50.0%)"));
    }
}
