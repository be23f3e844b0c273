//! databox-cm — the Databox container manager daemon.
//!
//! Single binary that assembles the engine:
//! - SLA store (redb)
//! - Root CA
//! - Container backend (Docker swarm, or the in-process simulator)
//! - Policy-engine and network-control clients
//! - Lifecycle orchestrator: bootstrap, then restore of persisted manifests
//! - REST API
//!
//! # Usage
//!
//! ```text
//! databox-cm run --config /etc/databox/cm.toml --port 8989 --data-dir /var/lib/databox
//! ```

mod config;
mod engine;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};
use databox_lifecycle::Orchestrator;
use databox_state::StateStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{CmConfig, Overrides};

#[derive(Parser)]
#[command(name = "databox-cm", about = "Databox container manager")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the engine, restore installed workloads and serve the API.
    Run {
        /// Configuration file. Defaults apply when it does not exist.
        #[arg(long, default_value = "/etc/databox/cm.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Development mode: `:latest` images, ephemeral root CA allowed.
        #[arg(long, env = "DATABOX_DEV", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
        dev: bool,

        /// Platform version tag for images.
        #[arg(long, env = "DATABOX_VERSION")]
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            dev,
            version,
        } => {
            let mut cfg = CmConfig::load_or_default(&config)?;
            cfg.apply_overrides(Overrides {
                port,
                data_dir,
                dev,
                version,
            });
            run(cfg).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,databox=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: CmConfig) -> anyhow::Result<()> {
    info!(
        dev = config.engine.dev,
        version = %config.engine.version,
        backend = ?config.backend.kind,
        "Databox container manager starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&config.state.data_dir)
        .with_context(|| format!("creating {}", config.state.data_dir.display()))?;
    let db_path = config.state.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let root_ca = engine::load_root_ca(&config)?;
    let ctx = engine::build_context(&config, root_ca, store)?;
    let orchestrator = Arc::new(Orchestrator::new(ctx));

    let boot = orchestrator.bootstrap().await?;
    info!(control = %boot.control_service, "engine ready");

    // ── Restore installed workloads ────────────────────────────

    let restored = orchestrator.restore_persisted().await?;
    for (name, reason) in &restored.failed {
        error!(workload = %name, %reason, "workload not restored");
    }
    info!(
        restored = restored.restored.len(),
        failed = restored.failed.len(),
        "persisted workloads restored"
    );

    // ── Start API server ───────────────────────────────────────

    let router = databox_api::build_router(orchestrator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("Databox container manager stopped");
    Ok(())
}
