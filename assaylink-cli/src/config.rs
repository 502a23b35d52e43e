//! CLI configuration file handling.
//!
//! A small TOML file remembers the link settings so routine invocations
//! need no flags:
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! device_id = 0x13
//! ```
//!
//! The default location follows the platform convention via `directories`;
//! `--config` points anywhere else. A missing file just yields defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persisted CLI defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link settings.
    pub connection: Connection,
}

/// Remembered link settings.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    /// Remembered serial port.
    pub port: Option<String>,
    /// Remembered baud rate.
    pub baud: Option<u32>,
    /// Default analyzer device id.
    pub device_id: Option<u8>,
}

impl Config {
    /// Platform-conventional config file location.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "assaylink")
            .map(|dirs| dirs.config_dir().join("assaylink.toml"))
    }

    /// Load from the given path, or the default location.
    ///
    /// A missing file is not an error; it yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
