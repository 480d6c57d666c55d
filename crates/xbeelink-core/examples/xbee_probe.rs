//! XBee Probe Tool
//!
//! Looks for an XBee on a serial port, switches it to API mode if needed and
//! prints a few identifying AT values.
//!
//! Usage:
//!   cargo run --example xbee_probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --baud RATE       Baud rate (default: 57600)
//!   --list            List serial ports and exit
//!   --no-configure    Do not try command mode if API frames get no answer
//!
//! Set RUST_LOG=xbeelink_core=debug to see frame traffic.

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;
use xbeelink_core::prelude::*;
use xbeelink_core::protocol::{list_ports, DEFAULT_BAUD_RATE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut baud_rate = DEFAULT_BAUD_RATE;
    let mut configure = true;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = Some(args[i].clone());
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i]
                        .parse()
                        .with_context(|| format!("invalid baud rate '{}'", args[i]))?;
                }
            }
            "--list" | "-l" => {
                print_ports();
                return Ok(());
            }
            "--no-configure" => {
                configure = false;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                port_name = Some(arg.to_string());
            }
            other => bail!("unknown option '{}'", other),
        }
        i += 1;
    }

    let port_name = match port_name {
        Some(name) => name,
        None => match list_ports().into_iter().next() {
            Some(port) => port.name,
            None => bail!("no serial ports found"),
        },
    };

    println!("=== XBee Probe ===");
    println!("Port: {}", port_name);
    println!("Baud: {}", baud_rate);
    println!();

    let config = DeviceConfig::new(port_name)
        .with_baud_rate(baud_rate)
        .with_reconnect(false);
    config.validate()?;

    let xbee = XBee::new(config);
    xbee.connect().await?;

    let result = query(&xbee, configure).await;
    xbee.close();
    result
}

async fn query(xbee: &XBee, configure: bool) -> anyhow::Result<()> {
    if configure {
        xbee.ensure_api_mode()
            .await
            .context("module did not switch to API mode")?;
    }

    for command in ["VR", "HV", "SH", "SL", "AI", "CH", "OI", "MY"] {
        match xbee.at_command(command, None).await {
            Ok(Some(value)) => match value.as_u64() {
                Some(n) => println!("AT{}: {:#x}", command, n),
                None => println!("AT{}: {:02x?}", command, value.as_bytes().unwrap_or(&[])),
            },
            Ok(None) => println!("AT{}: (no value)", command),
            Err(e) => println!("AT{}: {}", command, e),
        }
    }
    println!("Transition: {:?}", xbee.transition_state());
    Ok(())
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let marker = if port.is_likely_xbee() { "*" } else { " " };
        println!(
            "{} {} {}",
            marker,
            port.name,
            port.product.unwrap_or_default()
        );
    }
}

fn print_help() {
    println!(
        r#"XBee Probe Tool

Usage: xbee_probe [OPTIONS] [PORT]

Options:
  -p, --port PORT     Serial port (default: first port found)
  -b, --baud RATE     Baud rate (default: 57600)
  -l, --list          List serial ports and exit
      --no-configure  Do not try command mode if API frames get no answer
  -h, --help          Show this help
"#
    );
}
