//! slimplay binary: CLI parsing, logging setup, supervisor lifecycle

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slimplay::audio::cpal_sink::{list_targets, CpalSink};
use slimplay::config::{Config, SinkConfig, TransferMode};
use slimplay::constants::{DEFAULT_MAX_SAMPLE_RATE, DEFAULT_PLAYER_NAME, SLIMPROTO_PORT};
use slimplay::Player;

#[derive(Parser, Debug)]
#[command(
    name = "slimplay",
    version,
    about = "Headless Squeezebox-protocol player with bit-perfect output"
)]
struct Args {
    /// Server address (discovery is used if omitted)
    #[arg(short, long)]
    server: Option<String>,

    /// Control port
    #[arg(short, long, default_value_t = SLIMPROTO_PORT)]
    port: u16,

    /// Player name
    #[arg(short, long, default_value = DEFAULT_PLAYER_NAME)]
    name: String,

    /// MAC address override (aa:bb:cc:dd:ee:ff)
    #[arg(short, long)]
    mac: Option<String>,

    /// Output target index, 1-based (0 = default device)
    #[arg(short, long, default_value_t = 0)]
    target: usize,

    /// List output targets and exit
    #[arg(short = 'l', long)]
    list_targets: bool,

    /// Sink thread mode
    #[arg(long, default_value_t = 1)]
    thread_mode: i32,

    /// Sink cycle time in microseconds (0 = auto)
    #[arg(long, default_value_t = 0)]
    cycle_time: u32,

    /// Sink MTU override in bytes (0 = auto)
    #[arg(long, default_value_t = 0)]
    mtu: u32,

    /// Sink info packet cycle in microseconds
    #[arg(long, default_value_t = 100_000)]
    info_cycle: u32,

    /// Sink minimum cycle time in microseconds (0 = unused)
    #[arg(long, default_value_t = 0)]
    cycle_min_time: u32,

    /// Sink target profile limit time in microseconds (0 = self profile)
    #[arg(long, default_value_t = 200)]
    target_profile_limit_time: u32,

    /// Sink transfer mode
    #[arg(long, default_value = "auto", value_parser = parse_transfer_mode)]
    transfer_mode: TransferMode,

    /// Max sample rate advertised to the server in Hz
    #[arg(long, default_value_t = DEFAULT_MAX_SAMPLE_RATE)]
    max_rate: u32,

    /// Disable DSD support
    #[arg(long)]
    no_dsd: bool,

    /// Debug output (log level DEBUG)
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors and warnings only (log level WARN)
    #[arg(short, long)]
    quiet: bool,
}

fn parse_transfer_mode(s: &str) -> Result<TransferMode, String> {
    TransferMode::parse(s)
        .ok_or_else(|| "must be one of: auto, varmax, varauto, fixauto, random".to_string())
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "slimplay=debug"
    } else if args.quiet {
        "slimplay=warn"
    } else {
        "slimplay=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    if args.list_targets {
        println!("Available output targets:\n");
        list_targets();
        println!("\nUsage: slimplay -s <server> --target <index>");
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config {
        server: args.server,
        port: args.port,
        player_name: args.name,
        mac_address: args.mac,
        sink: SinkConfig {
            target: args.target,
            thread_mode: args.thread_mode,
            cycle_time_us: args.cycle_time,
            mtu: args.mtu,
            info_cycle_us: args.info_cycle,
            cycle_min_time_us: args.cycle_min_time,
            target_profile_limit_time_us: args.target_profile_limit_time,
            transfer_mode: args.transfer_mode,
        },
        max_sample_rate: args.max_rate,
        dsd_enabled: !args.no_dsd,
    };

    tracing::info!("slimplay v{}", env!("CARGO_PKG_VERSION"));
    match &config.server {
        Some(server) => tracing::info!("Server: {}:{}", server, config.port),
        None => tracing::info!("Server: discovery on port {}", config.port),
    }
    tracing::info!("Player: {}", config.player_name);
    tracing::info!(
        "Max rate: {} Hz, DSD: {}",
        config.max_sample_rate,
        if config.dsd_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let sink = Arc::new(CpalSink::new());
    let player = Player::new(config, sink);

    let running = player.running_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        running.store(false, Ordering::Release);
    })?;

    player.run()?;
    Ok(())
}
