use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use atools::config::{NavConfig, nav_config_path};
use atools::log_format::TargetFirstFormat;

mod commands;

use commands::{handle_listen, handle_replay_info, handle_serve};

#[derive(Parser)]
#[command(name = "atools")]
#[command(about = "Simulator telemetry server and tools")]
#[command(version)]
struct Cli {
    /// Config file (default: $ATOOLS_CONFIG or ./atools.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve simulator telemetry to connected clients
    Serve {
        /// Listen port, overrides the config file
        #[arg(long)]
        port: Option<u16>,
        /// Fetch interval in milliseconds
        #[arg(long)]
        update_rate_ms: Option<u64>,
        /// Limit AI aircraft to this distance from the user aircraft, 0 for no limit
        #[arg(long)]
        radius_km: Option<u32>,
        /// Play back a recorded replay file instead of the simulator
        #[arg(long)]
        load_replay: Option<PathBuf>,
        /// Playback speed multiplier for --load-replay
        #[arg(long)]
        replay_speed: Option<u32>,
        /// Record all telemetry to this file
        #[arg(long)]
        save_replay: Option<PathBuf>,
        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Connect to a server and print the packets it sends
    Listen {
        /// Server address
        #[arg(default_value = "localhost:51968")]
        addr: String,
        /// Request the weather for this station once connected
        #[arg(long = "weather")]
        weather_station: Option<String>,
        /// Disconnect after this many packets
        #[arg(long)]
        count: Option<u64>,
    },
    /// Show header and contents of a replay file
    ReplayInfo {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .event_format(TargetFirstFormat::new(std::io::stderr().is_terminal()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            port,
            update_rate_ms,
            radius_km,
            load_replay,
            replay_speed,
            save_replay,
            metrics_port,
        } => {
            let path = cli.config.unwrap_or_else(nav_config_path);
            let mut config = NavConfig::load_or_default(&path)?;

            if let Some(port) = port {
                config.port = port;
            }
            if let Some(update_rate_ms) = update_rate_ms {
                config.update_rate_ms = update_rate_ms;
            }
            if let Some(radius_km) = radius_km {
                config.radius_km = radius_km;
            }
            if let Some(replay_speed) = replay_speed {
                config.replay_speed = replay_speed;
            }
            if load_replay.is_some() {
                config.load_replay = load_replay;
            }
            if save_replay.is_some() {
                config.save_replay = save_replay;
            }
            if metrics_port.is_some() {
                config.metrics_port = metrics_port;
            }

            handle_serve(config).await
        }
        Commands::Listen {
            addr,
            weather_station,
            count,
        } => handle_listen(addr, weather_station, count).await,
        Commands::ReplayInfo { path } => handle_replay_info(&path),
    }
}
