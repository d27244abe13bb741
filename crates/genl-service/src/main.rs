//! genltest service entry point.
//!
//! Registers the `genltest` family, answers ECHO requests from client
//! sessions, and broadcasts whatever is written to the ping trigger to the
//! `mcgrp` group.
//!
//! # Usage
//!
//! ```text
//! genltest-service [OPTIONS]
//!
//! Options:
//!   --config  <PATH>   TOML config file [default: genltest-service.toml]
//!   --socket  <PATH>   Client session socket (overrides the config file)
//!   --trigger <PATH>   Ping trigger socket (overrides the config file)
//! ```
//!
//! Writing to the trigger broadcasts the written text:
//!
//! ```text
//! printf hello | nc -U /tmp/genltest-ping.sock
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use genl_service::infrastructure::config::load_config;
use genl_service::infrastructure::host::ServiceHost;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// genltest service.
#[derive(Debug, Parser)]
#[command(
    name = "genltest-service",
    about = "Generic-netlink style genltest family service",
    version
)]
struct Cli {
    /// TOML config file. A missing file means all defaults.
    #[arg(long, default_value = "genltest-service.toml", env = "GENLTEST_CONFIG")]
    config: PathBuf,

    /// Unix socket clients connect to.
    #[arg(long, env = "GENLTEST_SOCKET")]
    socket: Option<PathBuf>,

    /// Unix socket whose writes are broadcast to the `mcgrp` group.
    #[arg(long, env = "GENLTEST_TRIGGER")]
    trigger: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    if let Some(trigger) = cli.trigger {
        config.trigger_path = trigger;
    }

    // `RUST_LOG` wins over the config file's level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("genltest service starting");
    let host = ServiceHost::start(config)
        .await
        .context("failed to start genltest service")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    host.shutdown().await;
    Ok(())
}
