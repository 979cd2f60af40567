//! CLI Entry Point for geophone-node
//!
//! Runs the acquisition pipeline against simulated hardware, checks configuration
//! files and decodes captured uplink payloads.
//!
//! # Usage
//!
//! Run the node (Ctrl+C to stop):
//! ```bash
//! geophone-node run --config config/node.toml --burst-every 15
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! geophone-node check-config --config config/node.toml
//! ```
//!
//! Decode a payload:
//! ```bash
//! geophone-node decode 6553f1000064ff9c --timestamp seconds32
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geophone_node::config::{NodeConfig, DEFAULT_CONFIG_PATH};
use geophone_node::data::{TimestampWidth, TransmitPacket};
use geophone_node::hardware::mock::{MockAnalogInput, MockTransport, SystemClock};
use geophone_node::pipeline::{Collaborators, Node};
use geophone_node::tracing_setup::{self, OutputFormat, TracingConfig};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "geophone-node")]
#[command(about = "Seismic edge node with STA/LTA event detection", long_about = None)]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on the simulated geophone
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        seconds: Option<u64>,

        /// Inject a simulated ground-motion burst every N seconds
        #[arg(long, default_value = "20")]
        burst_every: u64,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print the effective configuration (file, defaults and environment merged)
        #[arg(long)]
        print: bool,
    },

    /// Decode a hex-encoded event payload
    Decode {
        /// Payload bytes as hex
        payload: String,

        /// Timestamp encoding used by the sender
        #[arg(long, default_value = "seconds32")]
        timestamp: TimestampWidth,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            seconds,
            burst_every,
        } => run_node(config, seconds, burst_every, cli.log_format).await,
        Commands::CheckConfig { config, print } => check_config(config, print),
        Commands::Decode { payload, timestamp } => decode_payload(&payload, timestamp),
    }
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    let config = NodeConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run_node(
    path: PathBuf,
    seconds: Option<u64>,
    burst_every: u64,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(&path)?;
    let tracing_config = TracingConfig::from_node_config(&config)?
        .with_format(format)
        .with_ansi(std::io::stdout().is_terminal());
    tracing_setup::init(tracing_config)?;

    let adc = Arc::new(MockAnalogInput::new(1000, 25));
    let transport = Arc::new(MockTransport::new());
    let mut node = Node::new(
        &config,
        Collaborators {
            adc: adc.clone(),
            clock: Arc::new(SystemClock::new(config.transmit.timestamp)),
            transport: transport.clone(),
        },
    )?;

    node.start_sampling();
    node.start_detection();
    info!(config = %path.display(), "Node running");

    let burst_len = config.sta_samples().max(1);
    let bursts = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(burst_every.max(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            info!(samples = burst_len, "Injecting simulated tremor");
            adc.inject_burst(burst_len, 8_000);
        }
    });

    match seconds {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    bursts.abort();
    node.shutdown().await;

    println!("{}", node.stats());
    for (i, packet) in transport.sent().iter().enumerate() {
        let decoded = TransmitPacket::decode(&packet.payload, config.transmit.timestamp)?;
        println!(
            "packet {}: port {}, {} bytes, timestamp {}, {} samples",
            i,
            packet.port,
            packet.payload.len(),
            decoded.timestamp,
            decoded.samples.len()
        );
    }
    Ok(())
}

fn check_config(path: PathBuf, print: bool) -> Result<()> {
    let config = load_config(&path)?;
    if print {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    let window = config.detection_window()?;
    println!("{}: ok", path.display());
    println!(
        "  sampling every {} ms into {} slots",
        config.sampling.period_ms, config.store.capacity
    );
    println!(
        "  STA {} / LTA {} samples, trigger {} reset {}",
        window.short(),
        window.long(),
        window.trigger_ratio(),
        window.reset_ratio()
    );
    println!(
        "  transmit {} samples on port {} ({:?}, {:?})",
        config.transmit.window,
        config.transmit.port,
        config.transmit.mode,
        config.transmit.timestamp
    );
    Ok(())
}

fn decode_payload(hex: &str, width: TimestampWidth) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let packet = TransmitPacket::decode(&bytes, width)?;
    println!("timestamp: {}", packet.timestamp);
    println!("samples ({}): {:?}", packet.samples.len(), packet.samples);
    Ok(())
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .trim()
        .trim_start_matches("0x")
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        bail!("hex payload has an odd number of digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte '{}'", pair))
        })
        .collect()
}
