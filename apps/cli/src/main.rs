mod demo;

use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hb04_core::{Hb04, Pendant, PendantConfig};
use tracing::{error, info, warn};

use crate::demo::Demo;

#[derive(Parser, Debug)]
#[command(author, version, about = "HB04 USB CNC pendant demo", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// USB vendor ID (hex, e.g. 0x10CE)
    #[arg(long, value_parser = parse_hex_id)]
    vid: Option<u16>,

    /// USB product ID (hex, e.g. 0xEB70)
    #[arg(long, value_parser = parse_hex_id)]
    pid: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex_id(raw: &str) -> Result<u16> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u16::from_str_radix(digits, 16)
        .with_context(|| format!("invalid USB ID '{raw}', expected hex (0x1234)"))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PendantConfig::load_from_file(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => PendantConfig::default(),
    };
    if let Some(vid) = args.vid {
        config.vendor_id = vid;
    }
    if let Some(pid) = args.pid {
        config.product_id = pid;
    }

    info!(
        vid = %format!("{:04X}", config.vendor_id),
        pid = %format!("{:04X}", config.product_id),
        "Starting HB04 demo (nusb backend)..."
    );

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let pendant = Hb04::from_config(config);
    let demo = Arc::new(Demo::new(pendant.handle()));
    pendant.on_event(move |event| demo.handle_event(event));

    // Give discovery a moment before reporting
    thread::sleep(Duration::from_secs(1));
    if pendant.is_running() {
        info!("HB04 demo is running. All activity is on the pendant. ^C to exit.");
    } else {
        warn!("HB04 is not connected yet; the demo starts as soon as it is attached. ^C to exit.");
    }

    stop_rx.recv().context("Ctrl-C channel closed")?;
    info!("Shutting down");
    drop(pendant);
    Ok(())
}
