mod config;

use agenthub_gateway::GatewayServer;
use agenthub_orchestrator::Hub;
use clap::{Parser, Subcommand, ValueEnum};
use config::AgenthubConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agenthub", about = "Agenthub - real-time agent orchestration hub")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agenthub.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse the config file and print the resolved settings
    Check,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve { host, port } => {
            let config = AgenthubConfig::load_or_default(&cli.config)?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let directory = Arc::new(config.directory());
            info!(
                agents = config.agents.len(),
                repositories = config.repositories.len(),
                alert_rules = config.alert_rules.len(),
                "Directory seeded"
            );

            let hub = Hub::new(config.hub_config(), directory);
            hub.start_background().await;
            let app = GatewayServer::build(hub.clone());

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Agenthub listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(hub.clone()))
                .await?;
            info!("Agenthub stopped");
        }
        Commands::Config { action } => match action {
            ConfigAction::Check => {
                let config = AgenthubConfig::load(&cli.config)?;
                println!("# {} is valid\n", cli.config.display());
                print!("{}", config.summary()?);
            }
        },
    }

    Ok(())
}

/// Resolves on Ctrl-C. Live sockets are only released once the hub drops
/// their transports, so the hub is shut down before axum drains.
async fn shutdown_signal(hub: Arc<Hub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown requested");
    hub.shutdown().await;
}
