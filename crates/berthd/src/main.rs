//! berthd — the Berth provisioner daemon.
//!
//! Assembles the provisioner from its production collaborators:
//! - State store (redb)
//! - Docker engines over bollard
//! - SSH executor
//! - In-process router
//! - Round-robin scheduler over the node registry
//!
//! # Usage
//!
//! ```text
//! berthd add-node node-1 http://10.0.0.5:2375 --label zone=a
//! berthd collect-status
//! berthd run
//! ```

mod status_loop;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use berth_core::BerthConfig;
use berth_engine::DockerEngine;
use berth_exec::SshExecutor;
use berth_provisioner::Provisioner;
use berth_router::MemoryRouter;
use berth_scheduler::{RoundRobinScheduler, Scheduler};
use berth_state::{Node, StateStore};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth container provisioner daemon")]
struct Cli {
    /// Path of berth.toml. Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "/etc/berth/berth.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Register a container host.
    AddNode {
        id: String,
        /// Engine endpoint, e.g. http://10.0.0.5:2375.
        address: String,
        /// Operator label as key=value. May be repeated.
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },
    /// Unregister a container host.
    RemoveNode { id: String },
    /// Print registered hosts as JSON.
    ListNodes,
    /// Run one status reconciliation pass and print the units as JSON.
    CollectStatus,
    /// Reconcile status periodically until Ctrl-C.
    Run {
        /// Seconds between passes. Overrides `status.interval_secs`.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = BerthConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Command::AddNode { id, address, labels } => {
            let store = open_store(&config)?;
            let mut node = Node::new(id.clone(), address.clone());
            node.labels.extend(labels);
            RoundRobinScheduler::new(store).add_node(node)?;
            info!(node = %id, %address, "node added");
            Ok(())
        }
        Command::RemoveNode { id } => {
            let store = open_store(&config)?;
            let node = RoundRobinScheduler::new(store).remove_node(&id)?;
            info!(node = %node.id, "node removed");
            Ok(())
        }
        Command::ListNodes => {
            let store = open_store(&config)?;
            let nodes = RoundRobinScheduler::new(store).list_nodes()?;
            println!("{}", serde_json::to_string_pretty(&nodes)?);
            Ok(())
        }
        Command::CollectStatus => {
            let provisioner = build_provisioner(config)?;
            let units = provisioner.collect_status().await?;
            println!("{}", serde_json::to_string_pretty(&units)?);
            Ok(())
        }
        Command::Run { interval } => {
            let interval = interval.unwrap_or(config.status.interval_secs);
            run(build_provisioner(config)?, Duration::from_secs(interval)).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,berthd=debug,berth=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn open_store(config: &BerthConfig) -> anyhow::Result<StateStore> {
    let path = &config.state.path;
    ensure_parent(path)?;
    let store = StateStore::open(path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

fn build_provisioner(config: BerthConfig) -> anyhow::Result<Arc<Provisioner>> {
    let store = open_store(&config)?;

    let mut executor = SshExecutor::new(config.ssh.user.clone());
    if let Some(port) = config.ssh.port {
        executor = executor.with_port(port);
    }
    if let Some(identity) = &config.ssh.identity_file {
        executor = executor.with_identity_file(identity.clone());
    }

    let scheduler = RoundRobinScheduler::new(store.clone());
    let provisioner = Provisioner::new(
        config,
        store,
        Arc::new(DockerEngine::new()),
        Arc::new(executor),
        Arc::new(MemoryRouter::new()),
        Arc::new(scheduler),
    );
    info!("provisioner initialized");
    Ok(Arc::new(provisioner))
}

async fn run(provisioner: Arc<Provisioner>, interval: Duration) -> anyhow::Result<()> {
    info!(interval_secs = interval.as_secs(), "berth daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(status_loop::run(provisioner, interval, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = handle.await;
    info!("berth daemon stopped");
    Ok(())
}

/// Parse a `key=value` operator label.
fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label {raw:?}, expected key=value")),
    }
}
