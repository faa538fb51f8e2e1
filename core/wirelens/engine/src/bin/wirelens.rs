use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirelens_engine::pcap_source::PcapSource;
use wirelens_engine::{CaptureSession, ChannelSink, EngineConfig, FilterMode, StartOutcome};

#[derive(Parser)]
#[command(name = "wirelens")]
#[command(author, version, about = "Live network traffic inspector")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices in selection order
    Devices {
        /// Print one JSON object per device
        #[arg(long)]
        json: bool,
    },

    /// Capture and print classified packets as JSON lines
    Capture {
        /// Device to capture on (default: first IPv4 device)
        #[arg(short, long)]
        interface: Option<String>,

        /// Emit every TCP/UDP/ICMP packet, not only significant ones
        #[arg(long)]
        unfiltered: bool,

        /// Only the first packet per source/destination IP pair
        #[arg(long)]
        dedup: bool,

        /// BPF filter expression (overrides the configuration)
        #[arg(short, long)]
        filter: Option<String>,

        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Stop after this many seconds
        #[arg(short = 't', long)]
        duration: Option<u64>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Devices { json } => list_devices(&config, json),
        Commands::Capture {
            interface,
            unfiltered,
            dedup,
            filter,
            count,
            duration,
        } => {
            if unfiltered {
                config.classifier.mode = FilterMode::Unfiltered;
            }
            if dedup {
                config.sink.dedup_ip_pairs = true;
            }
            if let Some(filter) = filter {
                config.capture.filter = filter;
            }
            capture(&config, interface.as_deref(), count, duration.map(Duration::from_secs))
        }
    }
}

fn list_devices(config: &EngineConfig, json: bool) -> Result<()> {
    let (sink, _rx) = ChannelSink::unbounded();
    let session = CaptureSession::new(PcapSource::new(&config.capture), config, Arc::new(sink));
    let devices = session.list_devices().context("listing capture devices")?;

    let mut out = std::io::stdout().lock();
    for device in devices {
        if json {
            writeln!(out, "{}", serde_json::to_string(&device)?)?;
        } else {
            let marker = if device.has_ipv4 { "*" } else { " " };
            writeln!(out, "{marker} {:<24} {}", device.name, device.display_name)?;
        }
    }
    Ok(())
}

fn capture(
    config: &EngineConfig,
    interface: Option<&str>,
    count: Option<u64>,
    duration: Option<Duration>,
) -> Result<()> {
    let (sink, rx) = ChannelSink::unbounded();
    let mut session = CaptureSession::new(PcapSource::new(&config.capture), config, Arc::new(sink));

    match session.start(interface).context("starting capture")? {
        StartOutcome::Started { device, link_type } => {
            tracing::info!(%device, link = %link_type, "listening");
        }
        StartOutcome::AlreadyActive => tracing::warn!("capture already active"),
    }

    let deadline = duration.map(|d| Instant::now() + d);
    let mut emitted = 0u64;
    let mut out = std::io::stdout().lock();

    loop {
        if count.is_some_and(|n| emitted >= n) {
            break;
        }
        let wait = match deadline {
            Some(at) => match at.checked_duration_since(Instant::now()) {
                Some(left) => left.min(Duration::from_millis(500)),
                None => break,
            },
            None => Duration::from_millis(500),
        };

        match rx.recv_timeout(wait) {
            Ok(packet) => {
                writeln!(out, "{}", packet.to_json()?)?;
                emitted += 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !session.is_active() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop().context("stopping capture")?;
    let stats = session.stats();
    tracing::info!(
        frames = stats.frames_received,
        emitted = stats.events_emitted,
        filtered = stats.events_filtered,
        "capture summary"
    );
    Ok(())
}
