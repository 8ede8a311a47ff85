// oracle-node: peer-to-peer oracle node
//
// Starts one node, optionally pings a target peer given on the command line,
// and exposes the webhook relay when a token is configured. Runs until
// SIGINT/SIGTERM.

mod bootstrap;
mod config;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use libp2p::Multiaddr;
use oracle_core::{NodeBuilder, StaticTokenAuthenticator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oracle-node")]
#[command(about = "Peer-to-peer oracle node", long_about = None)]
#[command(version)]
struct Cli {
    /// Peer to dial at startup and ping periodically
    #[arg(value_name = "PEER_MULTIADDR")]
    peer: Option<String>,

    /// Config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen port
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    webhook_port: Option<u16>,

    /// Private key file
    #[arg(long)]
    key_file: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_json, cli.log_dir.as_deref());

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_process_env()?;
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    if let Some(port) = cli.webhook_port {
        config.webhook.port = port;
    }
    if let Some(key_file) = cli.key_file {
        config.key_file = Some(key_file);
    }

    let target = cli
        .peer
        .as_deref()
        .map(|addr| {
            addr.parse::<Multiaddr>()
                .with_context(|| format!("Invalid peer address: {}", addr))
        })
        .transpose()?;

    let node_config = config.to_node_config(target)?;
    if config.webhook.token.is_some() {
        config.webhook.check_tls()?;
    }

    let (status_tx, status_rx) = mpsc::channel(oracle_core::pubsub::SUBSCRIPTION_BUFFER);
    let node = NodeBuilder::new(node_config)
        .with_worker_status(status_tx)
        .start()
        .await
        .context("Failed to start node")?;

    println!("{}", "Oracle node started".bold());
    println!("  {} Peer ID: {}", "✓".green(), node.peer_id().to_string().bright_cyan());
    println!("  {} libp2p host address: {}", "✓".green(), node.address());

    let report = node.bootstrap_report();
    if !config.bootstrap_nodes.is_empty() {
        println!(
            "  {} Bootstrap: {} connected, {} failed",
            if report.connected.is_empty() { "✗".red() } else { "✓".green() },
            report.connected.len(),
            report.failed.len()
        );
    }

    tokio::spawn(log_worker_status(status_rx));

    let server = match config.webhook.token.clone() {
        Some(token) => {
            let bridge = node.webhook_bridge(Arc::new(StaticTokenAuthenticator::new(token)));
            if let Some(cert) = &config.webhook.cert {
                tracing::info!("Webhook TLS terminated upstream with certificate {}", cert);
            }
            println!("  {} Webhook: 0.0.0.0:{}/webhook", "✓".green(), config.webhook.port);
            Some(tokio::spawn(server::serve(
                bridge,
                config.webhook.port,
                node.shutdown_token(),
            )))
        }
        None => {
            tracing::info!("No webhook token configured, webhook disabled");
            None
        }
    };

    wait_for_signal().await?;
    println!("Shutting down...");

    node.shutdown().await;
    if let Some(server) = server {
        if let Err(e) = server.await {
            tracing::warn!("Webhook server task failed: {}", e);
        }
    }

    Ok(())
}

/// Install the global subscriber. The returned guard flushes the file writer
/// on drop and must outlive the node.
fn init_tracing(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "oracle-node.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(log_dir.is_none())
        .with_writer(writer);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    guard
}

async fn log_worker_status(mut records: mpsc::Receiver<Vec<u8>>) {
    while let Some(record) = records.recv().await {
        tracing::info!(target: "worker_status", "{}", String::from_utf8_lossy(&record));
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}
