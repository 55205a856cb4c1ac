//! Launchers for the external tools: `make`, `STM32_Programmer_CLI` and the
//! serial port.

pub mod build;
pub mod flash;
pub mod monitor;

pub use build::{BuildArgs, run_build};
pub use flash::{FlashArgs, run_flash};
pub use monitor::{MonitorArgs, run_monitor};
