//! assaylink CLI - command-line access to an analyzer's serial link.
//!
//! ## Features
//!
//! - List candidate serial ports
//! - Send a single command and print the correlated reply
//! - Watch unsolicited frames pushed by the analyzer
//! - Transfer a firmware image with progress reporting
//! - Environment variable support
//!
//! Environment variables:
//!   ASSAYLINK_PORT    - Default serial port
//!   ASSAYLINK_BAUD    - Default baud rate (default: 115200)
//!   ASSAYLINK_DEVICE  - Default analyzer device id

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::path::PathBuf;

mod commands;
mod config;

use config::Config;

/// Fallback baud rate when neither flag, env, nor config name one.
const DEFAULT_BAUD: u32 = 115200;

/// Fallback analyzer device id.
const DEFAULT_DEVICE_ID: u8 = 0x13;

/// assaylink - talk to a laboratory analyzer over its serial link.
#[derive(Parser)]
#[command(name = "assaylink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ASSAYLINK_PORT")]
    port: Option<String>,

    /// Baud rate for the link.
    #[arg(short, long, global = true, env = "ASSAYLINK_BAUD")]
    baud: Option<u32>,

    /// Target analyzer device id (decimal or 0x-prefixed hex).
    #[arg(short, long, global = true, value_parser = parse_byte, env = "ASSAYLINK_DEVICE")]
    device: Option<u8>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    Ports {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// List all ports, not just recognized USB bridges.
        #[arg(long)]
        all: bool,
    },
    /// Send one command and print the outcome.
    Send {
        /// Command code (decimal or 0x-prefixed hex).
        #[arg(value_parser = parse_byte)]
        cmd: u8,
        /// Payload bytes as a hex string (e.g. "01FF3C").
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print valid incoming frames until interrupted.
    Listen {
        /// Stop after this many seconds (runs until killed otherwise).
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Transfer a firmware image to the analyzer.
    Upgrade {
        /// Path to the firmware image.
        image: PathBuf,
    },
}

/// CLI error classes with a stable exit-code mapping.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Usage or setup problem; maps to exit code 2 so scripts can branch
    /// on it.
    #[error("{0}")]
    Usage(String),
    /// Operation cancelled; maps to exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let exit_code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => {
                eprintln!("{} {msg}", style("error:").red().bold());
                2
            },
            Some(CliError::Cancelled(msg)) => {
                eprintln!("{msg}");
                130
            },
            None => {
                eprintln!("{} {err:#}", style("error:").red().bold());
                1
            },
        },
    };
    std::process::exit(exit_code);
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config_path.as_deref())?;

    match &cli.command {
        Commands::Ports { json, all } => commands::ports::run(*json, *all),
        Commands::Send { cmd, payload } => {
            commands::send::run(cli, &config, *cmd, payload.as_deref())
        },
        Commands::Listen { duration } => commands::listen::run(cli, &config, *duration),
        Commands::Upgrade { image } => commands::upgrade::run(cli, &config, image),
    }
}

/// Resolve the serial port: flag/env first, then config, then
/// single-candidate auto-detection.
pub(crate) fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }
    if let Some(port) = &config.connection.port {
        debug!("using port from config: {port}");
        return Ok(port.clone());
    }

    let candidates = assaylink::detect_bridge_ports();
    match candidates.as_slice() {
        [only] => {
            if !cli.quiet {
                eprintln!(
                    "{} auto-selected port {} [{}]",
                    style("ℹ").blue(),
                    only.name,
                    only.device.name()
                );
            }
            Ok(only.name.clone())
        },
        [] => Err(CliError::Usage(
            "no serial port specified and none detected; use --port".into(),
        )
        .into()),
        many => Err(CliError::Usage(format!(
            "multiple candidate ports detected ({}); use --port",
            many.iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into()),
    }
}

/// Resolve the baud rate: flag/env, then config, then the default.
pub(crate) fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

/// Resolve the analyzer device id: flag/env, then config, then the default.
pub(crate) fn resolve_device(cli: &Cli, config: &Config) -> u8 {
    cli.device
        .or(config.connection.device_id)
        .unwrap_or(DEFAULT_DEVICE_ID)
}

/// Parse a byte given as decimal or 0x-prefixed hex.
fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| format!("invalid byte value: {s}"))
}
