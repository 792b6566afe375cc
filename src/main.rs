use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use protocol_gateway::config::{load_config, GatewayConfig};
use protocol_gateway::lifecycle::{startup, Shutdown};
use protocol_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Protocol gateway: bridges HTTP, WebSocket and emulated WebSocket sessions", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => GatewayConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "protocol-gateway starting");

    match startup::run(config, Shutdown::new()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}
