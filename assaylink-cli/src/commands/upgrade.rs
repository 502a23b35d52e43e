//! Firmware upgrade command.

use anyhow::{Context, Result};
use assaylink::{FirmwareUpgrade, SerialConfig, Transport};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

use crate::{Cli, CliError, config::Config};

pub(crate) fn run(cli: &Cli, config: &Config, image: &Path) -> Result<()> {
    if !image.exists() {
        return Err(CliError::Usage(format!(
            "firmware image not found: {}",
            image.display()
        ))
        .into());
    }
    let size = std::fs::metadata(image)
        .with_context(|| format!("reading {}", image.display()))?
        .len();

    let port = crate::resolve_port(cli, config)?;
    let baud = crate::resolve_baud(cli, config);
    let device = crate::resolve_device(cli, config);

    if !cli.quiet {
        eprintln!(
            "{} upgrading device {device:#04X} from {} ({size} bytes) on {port}",
            style("📦").cyan(),
            image.display()
        );
    }

    let transport = Transport::open(&SerialConfig::new(&port, baud))?;

    let pb = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(size);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let upgrade = FirmwareUpgrade::new(&transport, device);
    let result = upgrade.transfer_file(image, |sent, _total| {
        pb.set_position(sent as u64);
    });
    pb.finish_and_clear();
    transport.close()?;
    result?;

    if !cli.quiet {
        eprintln!("{} firmware transfer complete", style("✓").green());
    }
    Ok(())
}
