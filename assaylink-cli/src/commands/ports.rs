//! Port listing command.

use anyhow::Result;
use assaylink::detect_ports;
use console::style;

pub(crate) fn run(json: bool, all: bool) -> Result<()> {
    let mut ports = detect_ports();
    if !all {
        let bridges: Vec<_> = ports
            .iter()
            .filter(|p| p.is_known_bridge())
            .cloned()
            .collect();
        // Known bridges first; fall back to everything when none match
        if !bridges.is_empty() {
            ports = bridges;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("No serial ports found.");
        return Ok(());
    }

    for port in &ports {
        let device = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();
        println!("{}{device}{product}", style(&port.name).bold());
    }
    Ok(())
}
