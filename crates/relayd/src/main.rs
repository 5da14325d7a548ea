//! relayd — the RelayGrid daemon.
//!
//! Single binary that assembles the relay fleet manager:
//! - Relay registry (redb)
//! - Lifecycle controller + in-process provisioner
//! - Allocation coordinator
//! - Capacity scan loop + management state
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! relayd standalone --config /etc/relaygrid/relaygrid.toml --port 8090 --data-dir /var/lib/relaygrid
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use relay_core::{AllocationLock, FleetConfig};
use relaygrid_alloc::AllocationCoordinator;
use relaygrid_api::ApiState;
use relaygrid_lifecycle::{EventBus, LifecycleController, LocalProvisioner};
use relaygrid_scan::{CapacityScanner, ManagementController, ScanLoop, StaticZoneDirectory};
use relaygrid_state::RelayRegistry;

#[derive(Parser)]
#[command(name = "relayd", about = "RelayGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (all components in one process, local provisioner).
    Standalone {
        /// Fleet configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long, default_value = "8090")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/relaygrid")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,relayd=debug,relaygrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => run_standalone(config, port, data_dir).await,
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => {
            let config = FleetConfig::from_file(&path)?;
            info!(path = ?path, zones = config.zones.len(), "fleet config loaded");
            Ok(config)
        }
        None => {
            info!("no config file given, using defaults");
            let mut config = FleetConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run_standalone(config: Option<PathBuf>, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("RelayGrid daemon starting in standalone mode");

    let config = load_config(config)?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("relays.redb");

    // ── Initialize components ──────────────────────────────────

    // Relay registry.
    let registry = RelayRegistry::open(&db_path)?;
    info!(path = ?db_path, "relay registry opened");

    // Lifecycle.
    let provisioner = Arc::new(LocalProvisioner::new().with_relay_port(config.endpoint.console_port));
    let lifecycle = Arc::new(LifecycleController::new(
        registry.clone(),
        provisioner,
        EventBus::default(),
    ));
    info!("lifecycle controller initialized");

    // One lock shared by assignment and expansion.
    let lock = AllocationLock::new();

    let coordinator = Arc::new(AllocationCoordinator::new(registry.clone(), lock.clone(), &config));
    info!(policy = coordinator.policy_name(), "allocation coordinator initialized");

    let management = ManagementController::new(registry.clone(), Arc::clone(&lifecycle));
    let zones = Arc::new(StaticZoneDirectory::new(&config.zones));

    let scanner = CapacityScanner::new(
        Arc::clone(&lifecycle),
        management.clone(),
        zones,
        lock,
        &config,
    );
    let scan_loop = ScanLoop::new(
        scanner,
        config.fleet.initial_scan_delay(),
        config.fleet.scan_interval(),
    );
    info!(
        zones = config.zones.len(),
        interval_ms = config.fleet.scan_interval_ms,
        "capacity scanner initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let scan_handle = tokio::spawn(scan_loop.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = relaygrid_api::build_router(ApiState::new(lifecycle, coordinator, management));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c, shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the scan loop to finish its current pass.
    let _ = scan_handle.await;

    info!("RelayGrid daemon stopped");
    Ok(())
}
