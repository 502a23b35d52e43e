//! Watch unsolicited frames pushed by the analyzer.

use anyhow::Result;
use assaylink::{FrameRecord, SerialConfig, Transport};
use console::style;
use std::time::Duration;

use crate::{Cli, config::Config};

pub(crate) fn run(cli: &Cli, config: &Config, duration: Option<u64>) -> Result<()> {
    let port = crate::resolve_port(cli, config)?;
    let baud = crate::resolve_baud(cli, config);

    let transport = Transport::open_with_callback(
        &SerialConfig::new(&port, baud),
        Box::new(print_frame),
    )?;

    if !cli.quiet {
        eprintln!(
            "{} listening on {port} @ {baud} (Ctrl-C to stop)",
            style("ℹ").blue()
        );
    }

    match duration {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => loop {
            std::thread::sleep(Duration::from_secs(3600));
        },
    }

    transport.close()?;
    Ok(())
}

fn print_frame(record: &FrameRecord) {
    println!(
        "cmd {:#04X} device {:#04X} index {:>3} payload {:02X?}",
        record.command().unwrap_or_default(),
        record.device_id().unwrap_or_default(),
        record.pack_index().unwrap_or_default(),
        record.payload().unwrap_or_default()
    );
}
