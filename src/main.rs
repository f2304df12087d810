//! hookscope - Main Application
//!
//! Captures HTTP requests per channel, streams them to live observers and
//! forwards them downstream.

use clap::{Parser, Subcommand};
use hookscope::{config::AppConfig, forward::Forwarder, server::start_server, SharedConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// hookscope - Webhook capture and forwarding server
#[derive(Parser)]
#[command(name = "hookscope")]
#[command(about = "Capture, inspect and forward webhook traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Server host
    #[arg(long, env = "HOOKSCOPE_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the capture server
    Serve,
    /// Send a test payload to a forward target
    Probe {
        /// Target URL
        #[arg(short, long)]
        target: String,
        /// Channel id reported in the payload
        #[arg(long, default_value = "probe")]
        channel: String,
    },
    /// Show current configuration
    Config,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("hookscope={},tower_http={}", log_level, log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    // Load configuration
    let mut config = if std::path::Path::new(&cli.config).exists() {
        AppConfig::load_from_file(&cli.config).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config file, using defaults");
            AppConfig::default()
        })
    } else {
        AppConfig::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })
    };

    // Override with CLI args
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command {
        Some(Commands::Serve) | None => {
            tracing::info!(
                host = %config.server.host,
                port = %config.server.port,
                max_requests = config.retention.max_requests,
                "Starting hookscope server"
            );
            start_server(SharedConfig::new(config)).await?;
        }
        Some(Commands::Probe { target, channel }) => {
            let forwarder = Forwarder::new(config.forward.timeout())?;
            let outcome = forwarder.probe(&channel, &target).await;

            println!("\n=== Probe Result ===");
            println!("Target: {}", outcome.target);
            println!("Success: {}", outcome.success);
            if let Some(status) = outcome.status {
                println!("Status: {}", status);
            }
            if let Some(error) = &outcome.error {
                println!("Error: {}", error);
            }
            println!("Latency: {:.2} ms", outcome.latency_ms);

            if !outcome.success {
                std::process::exit(1);
            }
        }
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
