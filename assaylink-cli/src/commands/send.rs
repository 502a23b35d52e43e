//! One-shot command send.

use anyhow::Result;
use assaylink::{Outcome, SerialConfig, Transport};
use console::style;

use crate::{Cli, CliError, config::Config};

pub(crate) fn run(cli: &Cli, config: &Config, cmd: u8, payload_hex: Option<&str>) -> Result<()> {
    let payload = payload_hex.map(parse_hex).transpose()?;
    let port = crate::resolve_port(cli, config)?;
    let baud = crate::resolve_baud(cli, config);
    let device = crate::resolve_device(cli, config);

    if !cli.quiet {
        eprintln!(
            "{} sending cmd {cmd:#04X} to device {device:#04X} on {port} @ {baud}",
            style("→").cyan()
        );
    }

    let transport = Transport::open(&SerialConfig::new(&port, baud))?;
    let outcome = transport.send(device, cmd, payload.as_deref());
    transport.close()?;

    match outcome? {
        Outcome::Success(reply) => {
            println!(
                "{} reply cmd {:#04X}, payload {:02X?}",
                style("✓").green(),
                reply.command().unwrap_or_default(),
                reply.payload().unwrap_or_default()
            );
            Ok(())
        },
        Outcome::Sent => {
            println!("{} sent (no reply expected)", style("✓").green());
            Ok(())
        },
        Outcome::Timeout => anyhow::bail!("no reply from the analyzer before the deadline"),
    }
}

/// Parse a hex string like "01FF3C" (whitespace tolerated) into bytes.
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() % 2 != 0 {
        return Err(CliError::Usage(format!("odd-length hex payload: {s:?}")).into());
    }
    (0..compact.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&compact[i..i + 2], 16)
                .map_err(|_| CliError::Usage(format!("invalid hex payload: {s:?}")).into())
        })
        .collect()
}
