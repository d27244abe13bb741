//! genltest client entry point.
//!
//! Resolves the `genltest` family, sends one ECHO request, prints the
//! reply, then prints every `mcgrp` notification until interrupted.
//!
//! Message text goes to stdout; logs go to stderr. The exit status is 1 if
//! any setup or request step fails, and 0 when interrupted while
//! listening.
//!
//! # Usage
//!
//! ```text
//! genltest-client [OPTIONS]
//!
//! Options:
//!   --socket        <PATH>  Service socket [default: $TMPDIR/genltest.sock]
//!   --reply-timeout <SECS>  Seconds to wait for the reply [default: 5]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use genl_core::family::genltest::REQUEST_TEXT;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use genl_client::application::error::ClientError;
use genl_client::application::session::ClientSession;
use genl_client::application::sink::{MessageSink, ReceivedMessage};
use genl_client::infrastructure::config::ClientConfig;
use genl_client::infrastructure::socket::{GenlSocket, UnixConnector};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// genltest client.
#[derive(Debug, Parser)]
#[command(
    name = "genltest-client",
    about = "Sends an ECHO request to the genltest service and listens on mcgrp",
    version
)]
struct Cli {
    /// Unix socket the service listens on.
    #[arg(long, env = "GENLTEST_SOCKET")]
    socket: Option<PathBuf>,

    /// Seconds to wait for the reply to the ECHO request.
    #[arg(long, env = "GENLTEST_REPLY_TIMEOUT")]
    reply_timeout: Option<u64>,
}

impl Cli {
    fn into_config(self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(socket) = self.socket {
            config.socket_path = socket;
        }
        if let Some(secs) = self.reply_timeout {
            config.reply_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Prints message text to stdout.
struct StdoutSink;

impl MessageSink for StdoutSink {
    fn on_message(&self, message: &ReceivedMessage) {
        match &message.msg {
            Some(text) => println!("message received: {text}"),
            None => warn!("msg attribute missing from message"),
        }
    }

    fn on_error(&self, error: &ClientError) {
        warn!("unable to parse message: {error}");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config();
    config.validate()?;

    let connector = UnixConnector::new(config.socket_path.clone());
    let mut session = ClientSession::open(&connector, Arc::new(StdoutSink), config.reply_timeout)
        .await
        .context("failed to set up genltest session")?;

    let result = run(&mut session).await;
    session.close().await;
    result
}

async fn run(session: &mut ClientSession<GenlSocket>) -> anyhow::Result<()> {
    session
        .send_echo(Some(REQUEST_TEXT))
        .await
        .context("failed to send message")?;
    println!("message sent");

    println!("listening for messages");
    session
        .receive_reply()
        .await
        .context("failed to receive reply")?;

    tokio::select! {
        result = session.listen() => match result {
            Ok(()) => Err(anyhow!("notification session ended")),
            Err(e) => Err(e).context("notification session failed"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for interrupt")?;
            info!("interrupted");
            Ok(())
        }
    }
}
