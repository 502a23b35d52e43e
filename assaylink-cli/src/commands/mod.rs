//! Subcommand implementations.

pub mod listen;
pub mod ports;
pub mod send;
pub mod upgrade;
