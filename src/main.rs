//! Entry point: parses the CLI, validates it into a `ServerConfig`, spawns
//! the shard pool and accepters, and blocks until a shutdown signal drains
//! everything.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kvi::cli::{Args, ServerConfig};
use kvi::hash::Hasher;
use kvi::registry::Registry;
use kvi::shard::Shard;
use kvi::shutdown::GracefulShutdown;
use kvi::{logging, server};

/// How long graceful shutdown waits for accepters and shards to drain
/// before giving up and reporting a timeout.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    let cfg = match ServerConfig::from_args(Args::parse()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = cfg.log;
    logging::init(log_level);

    let runtime = match tokio::runtime::Runtime::new().context("failed to create tokio runtime") {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(cfg: ServerConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    install_signal_handlers(shutdown_token.clone());

    let graceful = GracefulShutdown::new(shutdown_token.clone());
    graceful.set_graceful_timeout(GRACEFUL_SHUTDOWN_TIMEOUT).await;

    let hasher = Hasher::random();
    let shard_handles: Vec<_> = (0..cfg.shards)
        .map(|id| Shard::spawn(id, graceful.clone()))
        .collect();
    let registry = Registry::new(hasher, shard_handles);

    info!(
        component = "main",
        event = "startup",
        shards = cfg.shards,
        accepters = cfg.accepters,
        ips = ?cfg.ips,
        port = cfg.port,
        "kvi starting"
    );

    server::serve(
        &cfg.ips,
        cfg.port,
        cfg.accepters,
        registry,
        graceful.clone(),
        shutdown_token.clone(),
    )
    .await
    .context("failed to start accepters")?;

    if let Err(err) = graceful.await_shutdown().await {
        error!(component = "main", event = "shutdown_failed", error = %err, "graceful shutdown did not complete cleanly");
        return Err(err);
    }

    info!(component = "main", event = "shutdown_complete", "kvi stopped");
    Ok(())
}

/// `GracefulShutdown::await_shutdown` already races `SIGINT` against the
/// shared token; `SIGTERM` (the signal Kubernetes/`docker stop` send) is
/// handled here by cancelling the same token, so both converge on one
/// shutdown path.
#[cfg(unix)]
fn install_signal_handlers(token: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                token.cancel();
            }
            Err(err) => {
                error!(component = "main", event = "sigterm_handler_failed", error = %err, "failed to install SIGTERM handler");
            }
        }
    });
}

#[cfg(not(unix))]
fn install_signal_handlers(_token: CancellationToken) {}
