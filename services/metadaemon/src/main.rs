//! Station metadata processing daemon.
//!
//! Drives each metadata submission through conversion, merge, and
//! publication verification:
//! - Poll-based work queue over a persistent SQLite record store
//! - External SeisComP tools invoked as bounded subprocesses
//! - Publication confirmed against a remote FDSNWS catalog service
//! - HTTP status API for monitoring

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use metadaemon::config::DaemonConfig;
use metadaemon::daemon::Metadaemon;
use metadaemon::fdsnws::FdsnwsClient;
use metadaemon::server::{self, ServerState};
use metadaemon::stages::SeiscompTool;
use metadaemon::store::MetadataStore;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "metadaemon")]
#[command(about = "Station metadata conversion, merge, and publication pipeline")]
struct Args {
    /// Run one processing cycle and exit (vs continuous polling)
    #[arg(long)]
    once: bool,

    /// Directory for the metadata record database
    #[arg(long, default_value = "/data/metadaemon")]
    state_dir: PathBuf,

    /// Daemon configuration file
    #[arg(long, env = "METADAEMON_CONFIG", default_value = "config/metadaemon.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port for status HTTP server
    #[arg(long, env = "STATUS_PORT", default_value = "8082")]
    status_port: u16,

    /// Disable status HTTP server
    #[arg(long)]
    no_status_server: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting station metadata daemon");

    let config = DaemonConfig::load_or_default(&args.config);

    // Open record store
    tokio::fs::create_dir_all(&args.state_dir).await?;
    let state_path = args.state_dir.join("metadata.db");
    let store: Arc<MetadataStore> = Arc::new(MetadataStore::open(&state_path).await?);

    // Collaborators
    let tool = SeiscompTool::new(&config.seiscomp);
    let verifier = FdsnwsClient::new(&config.fdsnws)?;

    let daemon = Metadaemon::new(store.clone(), tool, verifier, config);

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start status server (unless disabled or in --once mode)
    if !args.no_status_server && !args.once {
        let server_state = Arc::new(ServerState {
            store: store.clone(),
        });
        let status_port = args.status_port;
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_state, status_port).await {
                tracing::error!(error = %e, "Status server failed");
            }
        });
    }

    if args.once {
        // Single cycle mode
        info!("Running single processing cycle");
        daemon.run_cycle().await;
    } else {
        // Continuous polling mode
        info!("Starting continuous polling");

        // Handle Ctrl+C
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            shutdown_tx_clone.send(()).ok();
        });

        daemon.run_forever(shutdown_tx.subscribe()).await?;
    }

    // Print final counts
    let counts = store.status_counts().await?;
    info!(
        pending = counts.pending,
        converted = counts.converted,
        merged = counts.merged,
        completed = counts.completed,
        rejected = counts.rejected,
        "Daemon session complete"
    );

    Ok(())
}
