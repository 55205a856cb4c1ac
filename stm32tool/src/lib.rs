pub mod config;
pub mod ctx;
pub mod makefile;
pub mod mcu;
pub mod resolve;
pub mod run;
pub mod ui;
pub mod utils;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
