//! The ping trigger: a write-only surface that broadcasts its input to the
//! `mcgrp` group.
//!
//! [`PingTrigger::store`] behaves like a one-line attribute file: the write
//! is truncated to the cap, broadcast as an ECHO notification, and the
//! number of accepted bytes is returned. The emit outcome is logged and
//! never reported to the writer.
//!
//! [`TriggerSocket`] exposes the trigger on a Unix socket. Everything a
//! connection sends up to EOF is one write.

use std::path::Path;
use std::sync::Arc;

use genl_core::family::genltest::{Attr, Command, GROUP_NAME};
use genl_core::protocol::envelope::MAX_FRAME_SIZE;
use genl_core::{AttrValue, Attributes};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::emitter::{BroadcastEmitter, EmitStatus};
use crate::infrastructure::listener::{ListenerError, UnixServer};

pub struct PingTrigger {
    emitter: BroadcastEmitter,
    max_len: usize,
}

impl PingTrigger {
    pub fn new(emitter: BroadcastEmitter, max_len: usize) -> Self {
        Self { emitter, max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Broadcasts `buf` (truncated to the cap) and returns how many bytes
    /// were accepted.
    pub async fn store(&self, buf: &[u8]) -> usize {
        let accepted = &buf[..buf.len().min(self.max_len)];
        if accepted.len() < buf.len() {
            debug!("trigger write truncated from {} to {} bytes", buf.len(), accepted.len());
        }

        let mut attrs = Attributes::new();
        attrs.insert(Attr::Msg.id(), AttrValue::Str(to_text(accepted, self.max_len)));

        match self.emitter.emit(GROUP_NAME, Command::Echo.id(), &attrs).await {
            Ok(EmitStatus::Delivered(n)) => info!("multicast message sent to {n} subscriber(s)"),
            Ok(EmitStatus::NoSubscribers) => {
                warn!("multicast message sent, but nobody was listening")
            }
            Err(e) => error!("failed to send multicast message: {e}"),
        }
        accepted.len()
    }
}

/// Decodes `bytes` as UTF-8, at most `cap` bytes of it. A character split
/// by truncation is cut off; other invalid sequences become U+FFFD, and the
/// result is cut back on a character boundary if replacement made it longer
/// than `cap`.
fn to_text(bytes: &[u8], cap: usize) -> String {
    let mut text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // error_len() is None only for an incomplete sequence at the end.
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    if text.len() > cap {
        let mut end = cap;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Serves a [`PingTrigger`] on a Unix socket.
pub struct TriggerSocket {
    server: UnixServer,
}

impl TriggerSocket {
    /// Binds `path`; each connection's bytes up to EOF are passed to
    /// [`PingTrigger::store`].
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] if the socket cannot be bound.
    pub fn bind(path: &Path, trigger: Arc<PingTrigger>) -> Result<Self, ListenerError> {
        let server = UnixServer::bind(path, move |stream, shutdown_rx| {
            serve_write(stream, Arc::clone(&trigger), shutdown_rx)
        })?;
        info!("ping trigger available at {}", path.display());
        Ok(Self { server })
    }

    pub fn path(&self) -> &Path {
        self.server.path()
    }

    /// Stops accepting writes and removes the socket file. Idempotent.
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
        info!("ping trigger at {} removed", self.server.path().display());
    }
}

/// Reads one write up to EOF and stores it. A write still open at shutdown
/// is discarded.
async fn serve_write(
    stream: UnixStream,
    trigger: Arc<PingTrigger>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = Vec::new();
    let mut reader = stream.take(MAX_FRAME_SIZE as u64);
    tokio::select! {
        read = reader.read_to_end(&mut buf) => {
            if let Err(e) = read {
                warn!("failed to read trigger write: {e}");
                return;
            }
        }
        _ = shutdown_rx.changed() => {
            debug!("discarding unfinished trigger write at shutdown");
            return;
        }
    }
    let accepted = trigger.store(&buf).await;
    debug!("trigger accepted {accepted} of {} byte(s)", buf.len());
}
