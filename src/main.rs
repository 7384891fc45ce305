//! A command line tool for managing USB-attached 3D printers.

#![deny(missing_docs)]

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use usb_printing::{Config, ManagerEvent, PortEnumerator, UsbPrinterManager};

/// This doc string acts as a help message when the user runs '--help'
/// as do all doc strings on fields.
#[derive(Parser, Debug, Clone)]
#[clap(version = clap::crate_version!(), author = clap::crate_authors!("\n"))]
pub struct Opts {
    /// Print debug info
    #[clap(short, long)]
    pub debug: bool,

    /// Print logs as json
    #[clap(short, long)]
    pub json: bool,

    /// The subcommand to run.
    #[clap(subcommand)]
    pub subcmd: SubCommand,

    /// Path to config file.
    #[clap(short, long, default_value = "usb-printing.toml")]
    pub config: std::path::PathBuf,
}

/// A subcommand for our cli.
#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    /// List the USB serial ports that look like attached printers.
    ListPorts,

    /// Discover printers and keep them connected until interrupted.
    Watch,

    /// Flash firmware for the configured machine onto attached printers.
    UpdateFirmware {
        /// Flash only the printer on this port. All attached printers
        /// when not given.
        #[clap(long)]
        port: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts: Opts = Opts::parse();

    let level = if opts.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (json, plain) = if opts.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().pretty()))
    };

    tracing_subscriber::registry().with(filter).with(json).with(plain).init();

    let config = if opts.config.is_file() {
        Config::from_file(&opts.config)?
    } else {
        Config::default()
    };

    if let Err(err) = run_cmd(&opts, config).await {
        bail!("running cmd `{:?}` failed: {:?}", &opts.subcmd, err);
    }

    Ok(())
}

async fn run_cmd(opts: &Opts, config: Config) -> Result<()> {
    match &opts.subcmd {
        SubCommand::ListPorts => {
            let ports = usb_printing::serial::SerialPortEnumerator.scan().await;
            if ports.is_empty() {
                println!("no printer ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        SubCommand::Watch => {
            let mut manager = UsbPrinterManager::new(config);
            let mut events = manager.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let ManagerEvent::UserMessage(message) = event {
                        println!("{}", message);
                    }
                }
            });

            manager.start();
            tokio::select! {
                _ = manager.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                }
            }
            manager.stop().await;
        }
        SubCommand::UpdateFirmware { port } => {
            let mut manager = UsbPrinterManager::new(config);

            // One discovery pass so the manager knows what is attached.
            manager.start();
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            manager.tick().await;
            manager.stop().await;

            match port {
                Some(port) => manager.update_firmware_by_serial(port).await?,
                None => manager.update_all_firmware().await?,
            }

            for port in manager.tracked_ports() {
                if let Some(device) = manager.device(&port) {
                    println!("{}: progress {:.0}%", port, device.progress());
                }
            }
        }
    }

    Ok(())
}
