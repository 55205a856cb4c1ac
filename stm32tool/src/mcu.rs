//! Compiler parameters for STM32 parts.
//!
//! The table is searched in order and the first rule whose pattern occurs in
//! the part number wins, so specific families must stay in front of the broad
//! family prefixes at the end of [`RULES`].

use std::{fmt, sync::LazyLock};

use regex::Regex;

/// Part used when nothing in the table matches.
pub const DEFAULT_MCU: &str = "STM32F407VGTx";

/// Define that enables the ST HAL drivers in every generated build.
pub const HAL_DEFINE: &str = "USE_HAL_DRIVER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatAbi {
    Soft,
    SoftFp,
    Hard,
}

impl FloatAbi {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloatAbi::Soft => "soft",
            FloatAbi::SoftFp => "softfp",
            FloatAbi::Hard => "hard",
        }
    }
}

impl fmt::Display for FloatAbi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory sizes in KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize {
    pub flash: u32,
    pub ram: u32,
    pub ccm_ram: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuParams {
    /// Value for `-mcpu`.
    pub core: &'static str,
    /// Value for `-mfpu`, `None` for parts without an FPU.
    pub fpu: Option<&'static str>,
    pub float_abi: FloatAbi,
    /// CMSIS device define, e.g. `STM32F407xx`.
    pub define: &'static str,
    /// Startup assembly base name without extension.
    pub startup: &'static str,
    pub memory: MemorySize,
}

impl McuParams {
    pub fn cpu_flag(&self) -> String {
        format!("-mcpu={}", self.core)
    }

    pub fn fpu_flag(&self) -> Option<String> {
        self.fpu.map(|fpu| format!("-mfpu={fpu}"))
    }

    pub fn float_abi_flag(&self) -> String {
        format!("-mfloat-abi={}", self.float_abi)
    }

    pub fn has_hard_float(&self) -> bool {
        self.fpu.is_some() && self.float_abi == FloatAbi::Hard
    }

    /// File name of the startup assembly, e.g. `startup_stm32f407xx.s`.
    pub fn startup_file_name(&self) -> String {
        format!("{}.s", self.startup)
    }
}

pub struct McuRule {
    pub pattern: &'static str,
    pub params: McuParams,
}

const fn rule(pattern: &'static str, params: McuParams) -> McuRule {
    McuRule { pattern, params }
}

const fn m4f(
    define: &'static str,
    startup: &'static str,
    flash: u32,
    ram: u32,
    ccm_ram: u32,
) -> McuParams {
    McuParams {
        core: "cortex-m4",
        fpu: Some("fpv4-sp-d16"),
        float_abi: FloatAbi::Hard,
        define,
        startup,
        memory: MemorySize { flash, ram, ccm_ram },
    }
}

const STM32F407: McuParams = m4f("STM32F407xx", "startup_stm32f407xx", 1024, 128, 64);
const STM32F405: McuParams = m4f("STM32F405xx", "startup_stm32f405xx", 1024, 128, 64);
const STM32F401: McuParams = m4f("STM32F401xC", "startup_stm32f401xc", 256, 64, 0);
const STM32F411: McuParams = m4f("STM32F411xE", "startup_stm32f411xe", 512, 128, 0);
const STM32F429: McuParams = m4f("STM32F429xx", "startup_stm32f429xx", 2048, 192, 64);
const STM32F446: McuParams = m4f("STM32F446xx", "startup_stm32f446xx", 512, 128, 0);
const STM32F303: McuParams = m4f("STM32F303xC", "startup_stm32f303xc", 256, 40, 8);
const STM32G431: McuParams = m4f("STM32G431xx", "startup_stm32g431xx", 128, 22, 10);
const STM32G474: McuParams = m4f("STM32G474xx", "startup_stm32g474xx", 512, 96, 32);
const STM32L476: McuParams = m4f("STM32L476xx", "startup_stm32l476xx", 1024, 128, 0);

const STM32F103: McuParams = McuParams {
    core: "cortex-m3",
    fpu: None,
    float_abi: FloatAbi::Soft,
    define: "STM32F103xB",
    startup: "startup_stm32f103xb",
    memory: MemorySize {
        flash: 64,
        ram: 20,
        ccm_ram: 0,
    },
};

const STM32F030: McuParams = McuParams {
    core: "cortex-m0",
    fpu: None,
    float_abi: FloatAbi::Soft,
    define: "STM32F030x8",
    startup: "startup_stm32f030x8",
    memory: MemorySize {
        flash: 64,
        ram: 8,
        ccm_ram: 0,
    },
};

const STM32F746: McuParams = McuParams {
    core: "cortex-m7",
    fpu: Some("fpv5-sp-d16"),
    float_abi: FloatAbi::Hard,
    define: "STM32F746xx",
    startup: "startup_stm32f746xx",
    memory: MemorySize {
        flash: 1024,
        ram: 320,
        ccm_ram: 0,
    },
};

const STM32H743: McuParams = McuParams {
    core: "cortex-m7",
    fpu: Some("fpv5-d16"),
    float_abi: FloatAbi::Hard,
    define: "STM32H743xx",
    startup: "startup_stm32h743xx",
    memory: MemorySize {
        flash: 2048,
        ram: 512,
        ccm_ram: 0,
    },
};

const STM32H750: McuParams = McuParams {
    define: "STM32H750xx",
    startup: "startup_stm32h750xx",
    memory: MemorySize {
        flash: 128,
        ram: 512,
        ccm_ram: 0,
    },
    ..STM32H743
};

pub const DEFAULT_PARAMS: McuParams = STM32F407;

pub static RULES: &[McuRule] = &[
    rule("STM32F407", STM32F407),
    rule("STM32F405", STM32F405),
    rule("STM32F401", STM32F401),
    rule("STM32F411", STM32F411),
    rule("STM32F429", STM32F429),
    rule("STM32F446", STM32F446),
    rule("STM32F303", STM32F303),
    rule("STM32F103", STM32F103),
    rule("STM32F030", STM32F030),
    rule("STM32F746", STM32F746),
    rule("STM32G431", STM32G431),
    rule("STM32G474", STM32G474),
    rule("STM32L476", STM32L476),
    rule("STM32H743", STM32H743),
    rule("STM32H750", STM32H750),
    // closest relative for parts without an exact entry
    rule("STM32F4", STM32F407),
    rule("STM32F1", STM32F103),
    rule("STM32F0", STM32F030),
    rule("STM32F7", STM32F746),
    rule("STM32G4", STM32G431),
    rule("STM32L4", STM32L476),
    rule("STM32H7", STM32H743),
];

/// Returns the parameters of the first rule whose pattern occurs in `mcu`,
/// or [`DEFAULT_PARAMS`].
pub fn lookup(mcu: &str) -> &'static McuParams {
    RULES
        .iter()
        .find(|rule| mcu.contains(rule.pattern))
        .map(|rule| &rule.params)
        .unwrap_or(&DEFAULT_PARAMS)
}

/// `STM32` + series letter + line digits + pin/flash code, then the package letter.
static PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(STM32[A-Z][0-9]{3}[A-Z0-9]{2})([A-Z]?)").unwrap());

fn normalize(mcu: &str) -> String {
    mcu.trim()
        .to_uppercase()
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string()
}

/// Family and variant part of the identifier, e.g. `STM32F407VG`.
pub fn family_variant(mcu: &str) -> Option<String> {
    let mcu = normalize(mcu);
    PART_RE
        .captures(&mcu)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Series name used in the HAL and CMSIS directory names, e.g. `STM32F4xx`.
pub fn series(mcu: &str) -> Option<String> {
    let mcu = mcu.trim().to_uppercase();
    let start = mcu.find("STM32")? + "STM32".len();
    let code: String = mcu[start..].chars().take(2).collect();
    let mut chars = code.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(digit)) if letter.is_ascii_uppercase() && digit.is_ascii_digit() => {
            Some(format!("STM32{code}xx"))
        }
        _ => None,
    }
}

/// Linker script name CubeMX generates for the part,
/// e.g. `STM32F407VGTx` -> `STM32F407VGTX_FLASH.ld`.
///
/// Only a guess: nothing checks that the file exists or matches the part.
pub fn expected_linker_script(mcu: &str) -> Option<String> {
    let mcu = normalize(mcu);
    let caps = PART_RE.captures(&mcu)?;
    let family = caps.get(1)?.as_str();
    let package = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Some(format!("{family}{package}X_FLASH.ld"))
}
