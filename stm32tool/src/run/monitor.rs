use std::{
    io::{self, Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use globset::Glob;
use serialport::SerialPort;

use crate::{ctx::AppContext, ui};

#[derive(Args, Debug, Clone, Default)]
pub struct MonitorArgs {
    /// Serial port, overrides the configured pattern
    #[arg(short, long)]
    pub port: Option<String>,
    /// Baud rate, overrides the configured one
    #[arg(short, long)]
    pub baud_rate: Option<u32>,
}

/// Port names matching a glob such as `/dev/ttyUSB*` or `COM*`.
pub fn matching_ports(pattern: &str, ports: &[String]) -> anyhow::Result<Vec<String>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("invalid serial port pattern: {pattern}"))?
        .compile_matcher();
    Ok(ports
        .iter()
        .filter(|name| matcher.is_match(name.as_str()))
        .cloned()
        .collect())
}

pub fn available_ports() -> anyhow::Result<Vec<String>> {
    let ports = serialport::available_ports().context("can not list serial ports")?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

fn pick_port(pattern: &str) -> anyhow::Result<String> {
    let mut candidates = matching_ports(pattern, &available_ports()?)?;
    match candidates.len() {
        0 => bail!("no serial port matches {pattern}"),
        1 => Ok(candidates.remove(0)),
        _ => {
            let i = ui::shell_select("Select a serial port:", &candidates)?;
            Ok(candidates.swap_remove(i))
        }
    }
}

pub fn run_monitor(ctx: &AppContext, args: &MonitorArgs) -> anyhow::Result<()> {
    let port = match &args.port {
        Some(port) => port.clone(),
        None => pick_port(&ctx.config.serial_port)?,
    };
    let baud_rate = args.baud_rate.unwrap_or(ctx.config.baud_rate);

    let tx = serialport::new(&port, baud_rate)
        .timeout(Duration::from_millis(200))
        .open()
        .with_context(|| format!("can not open {port}"))?;
    let rx = tx.try_clone()?;

    println!(
        "{}",
        format!("Connected to {port} at {baud_rate} baud, Ctrl+] to exit").green()
    );
    SerialTerm::new(tx, rx).run()
}

/// Bytes sent to the device for a key press, `None` for keys without one.
fn key_bytes(key: &KeyEvent) -> Option<Vec<u8>> {
    let bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if !c.is_ascii() {
                return None;
            }
            vec![(c as u8) & 0x1f]
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x08],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1b],
        _ => return None,
    };
    Some(bytes)
}

fn is_exit(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

pub struct SerialTerm {
    tx: Box<dyn SerialPort>,
    rx: Option<Box<dyn SerialPort>>,
    stop: Arc<AtomicBool>,
}

impl SerialTerm {
    pub fn new(tx: Box<dyn SerialPort>, rx: Box<dyn SerialPort>) -> Self {
        SerialTerm {
            tx,
            rx: Some(rx),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let Some(mut rx) = self.rx.take() else {
            bail!("terminal already ran");
        };
        enable_raw_mode()?;

        let stop = self.stop.clone();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 256];
            let mut last = 0u8;
            let mut stdout = io::stdout();
            while !stop.load(Ordering::Relaxed) {
                match rx.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        for &b in &buf[..n] {
                            // raw mode does not move back to column 0 on a bare '\n'
                            if b == b'\n' && last != b'\r' {
                                let _ = stdout.write_all(b"\r");
                            }
                            last = b;
                        }
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        stop.store(true, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }
            Ok(())
        });

        let res = self.input_loop();
        self.stop.store(true, Ordering::Relaxed);
        let read_res = reader
            .join()
            .map_err(|_| anyhow!("serial reader panicked"))?;
        res?;
        read_res.context("serial read failed")?;
        Ok(())
    }

    fn input_loop(&mut self) -> anyhow::Result<()> {
        while !self.stop.load(Ordering::Relaxed) {
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if is_exit(&key) {
                break;
            }
            if let Some(bytes) = key_bytes(&key) {
                self.tx.write_all(&bytes)?;
            }
        }
        Ok(())
    }
}

impl Drop for SerialTerm {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = disable_raw_mode();
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filters_by_pattern() {
        let all = ports(&["/dev/ttyS0", "/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0"]);
        assert_eq!(
            matching_ports("/dev/ttyUSB*", &all).unwrap(),
            ports(&["/dev/ttyUSB0", "/dev/ttyUSB1"])
        );
        assert!(matching_ports("COM*", &all).unwrap().is_empty());
    }

    #[test]
    fn exact_port_name() {
        let all = ports(&["COM3", "COM4"]);
        assert_eq!(matching_ports("COM4", &all).unwrap(), ports(&["COM4"]));
    }

    #[test]
    fn control_keys() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(key_bytes(&ctrl_c), Some(vec![0x03]));
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(key_bytes(&enter), Some(vec![b'\r']));
        let up = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(key_bytes(&up), None);

        let quit = KeyEvent::new(KeyCode::Char(']'), KeyModifiers::CONTROL);
        assert!(is_exit(&quit));
        assert!(!is_exit(&ctrl_c));
    }
}
