use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use ant_core::{NusbTransport, SyncConfig, TrackerSession, decode_bank};

#[derive(Parser, Debug)]
#[command(author, version, about = "ANT tracker sync tool", long_about = None)]
struct Args {
    /// Path to a TOML config with radio parameters
    #[arg(long)]
    config: Option<String>,

    /// Data bank indices to read (repeatable)
    #[arg(long = "bank", default_values_t = vec![0u8, 1, 2, 4, 6])]
    banks: Vec<u8>,

    /// Print raw bank bytes instead of decoding them
    #[arg(long)]
    raw: bool,

    /// Put the tracker to sleep after the dump
    #[arg(long)]
    sleep: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
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
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => SyncConfig::load_from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => SyncConfig::default(),
    };

    info!("Looking for an ANT transceiver...");
    let transport = NusbTransport::open().context("no supported USB transceiver found")?;
    let mut session = TrackerSession::with_config(
        transport,
        std::sync::Arc::new(ant_core::TracingObserver),
        config,
    );

    session
        .init_for_transfer()
        .context("tracker link bring-up failed")?;

    let tracker = session.get_tracker_info().context("info opcode failed")?;
    println!("{tracker}");

    for &index in &args.banks {
        let data = session
            .read_data_bank(index)
            .with_context(|| format!("reading data bank {index}"))?;
        info!(bank = index, len = data.len(), "Bank retrieved");
        println!("--- bank {index} ({} bytes) ---", data.len());
        if args.raw {
            println!("{}", hex_dump(&data));
        } else {
            let decoded = decode_bank(index, tracker.hardware_version, &data)
                .with_context(|| format!("decoding data bank {index}"))?;
            println!("{decoded}");
        }
    }

    if args.sleep {
        session.command_sleep().context("sleep command failed")?;
        info!("Tracker sent to sleep");
    }

    session.channel().close_channel()?;
    Ok(())
}

fn hex_dump(data: &[u8]) -> String {
    data.chunks(16)
        .map(|row| {
            row.iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
