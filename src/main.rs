mod capture;
mod cli;
mod clock;
mod error;
mod monitor;
mod registry;
mod stats;
mod ui;

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::capture::usbmon::describe_buses;
use crate::cli::{Cli, Commands, ListFormat};
use crate::error::{CaptureError, ConfigError};
use crate::monitor::run_monitor;

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Creating log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init().ok();
        }
        None => {
            builder.try_init().ok();
        }
    }
    Ok(())
}

fn print_buses(usbmon_dir: &Path, format: ListFormat) -> Result<()> {
    let buses = describe_buses(usbmon_dir)?;
    match format {
        ListFormat::Text => {
            if buses.is_empty() {
                return Err(CaptureError::NoBuses { dir: usbmon_dir.to_path_buf() }.into());
            }
            for b in buses {
                match b.description {
                    Some(desc) => println!("{}\t{}", b.bus, desc),
                    None => println!("{}", b.bus),
                }
            }
        }
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&buses)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let result: Result<()> = init_logging(cli.log_file.as_deref()).and_then(|()| match cli.command {
        Some(Commands::Buses { usbmon_dir, format }) => print_buses(&usbmon_dir, format),
        Some(Commands::Monitor(monitor)) => run_monitor(monitor),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    });

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: usbmon missing or no buses, 4: permission denied, 5: trace unreadable,
    // 6: bad configuration, 1: other
    for cause in err.chain() {
        if let Some(cap) = cause.downcast_ref::<CaptureError>() {
            return match cap {
                CaptureError::UsbmonUnavailable { .. } | CaptureError::NoBuses { .. } => 2,
                CaptureError::PermissionDenied { .. } => 4,
                CaptureError::Trace { .. } => 5,
            };
        }
        if cause.is::<ConfigError>() {
            return 6;
        }
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            return match ioe.kind() {
                std::io::ErrorKind::PermissionDenied => 4,
                _ => 1,
            };
        }
    }
    1
}
