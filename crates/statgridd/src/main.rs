//! statgridd — the statgrid daemon.
//!
//! Single binary that assembles:
//! - State store (redb)
//! - Calc and save worker pools
//! - Janitor
//! - HTTP API
//!
//! # Usage
//!
//! ```text
//! statgridd serve --config /etc/statgrid/statgrid.toml --port 8081 --data-dir /var/lib/statgrid
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use statgrid_core::StatgridConfig;
use statgrid_queue::{Janitor, StatContext, StatRegistry, WorkerPool};
use statgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,statgridd=debug,statgrid=debug";

#[derive(Parser)]
#[command(name = "statgridd", about = "statgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the job workers.
    Serve {
        /// Path to statgrid.toml. Built-in defaults apply without it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on, overriding `server.host`.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on, overriding `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state, overriding `store.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => StatgridConfig::from_file(&path)?,
                None => StatgridConfig::default(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.store.data_dir = data_dir;
            }
            config.validate()?;
            serve(config).await
        }
    }
}

async fn serve(config: StatgridConfig) -> anyhow::Result<()> {
    info!("statgrid daemon starting");

    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.store.db_path();
    let addr = config.listen_addr()?;

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = StatRegistry::with_builtins();
    info!(stats = ?registry.names(), "stat registry loaded");

    let ctx = StatContext::new(store, config, registry);
    info!(sink = ctx.sink.name(), "save sink selected");

    let pool = WorkerPool::new(ctx.clone());
    pool.recover()?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let worker_handles = pool.start(shutdown_rx.clone());

    let janitor = Janitor::new(&ctx);
    let janitor_shutdown = shutdown_rx.clone();
    let janitor_handle = tokio::spawn(async move {
        janitor.run(janitor_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = statgrid_api::build_router(ctx);
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = janitor_handle.await;

    info!("statgrid daemon stopped");
    Ok(())
}
