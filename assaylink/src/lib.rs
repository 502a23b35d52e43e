//! # assaylink
//!
//! A library for controlling laboratory analyzers over a serial link.
//!
//! This crate provides the transport core shared by analyzer front-ends:
//!
//! - Wire frame encoding with a checksum trailer
//! - Stream reassembly that survives junk, split reads, and corruption
//! - Command/acknowledgment correlation with per-command deadlines
//! - A duplex sender/receiver engine with auto-acknowledgment
//! - Chunked firmware transfer
//!
//! The library moves opaque payloads; interpreting them (temperatures,
//! self-test results, ...) is the consuming application's concern.
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for discovery and config types
//!
//! ## Example
//!
//! ```rust,no_run
//! use assaylink::{Outcome, SerialConfig, Transport, protocol::cmd};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115200);
//!     let transport = Transport::open(&config)?;
//!
//!     match transport.send(0x13, cmd::STATUS, None)? {
//!         Outcome::Success(reply) => println!("analyzer replied: {:02X?}", reply.bytes()),
//!         Outcome::Timeout => eprintln!("analyzer did not answer"),
//!         Outcome::Sent => {},
//!     }
//!
//!     transport.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod firmware;
pub mod port;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use device::{detect_bridge_ports, detect_ports};
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, TransportKind},
    error::{Error, Result},
    firmware::{FirmwareUpgrade, UpgradeConfig, plan_chunks},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Classification, Frame, FrameRecord, StreamReassembler},
    transport::{FrameCallback, Outcome, Transport},
};
