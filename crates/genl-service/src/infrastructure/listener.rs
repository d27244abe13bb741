//! Unix-socket listener bridging client sessions onto the message bus.
//!
//! Each accepted stream connection is one transport session: it is
//! attached to the bus as one port, frames read from the stream are handed
//! to [`MessageBus::ingress`], and frames queued for the port are written
//! back to the stream.
//!
//! # Framing
//!
//! The stream carries back-to-back frames. A reader takes the 16-byte
//! transport header first, learns the frame length from it, then reads the
//! rest. A header that does not parse closes the connection: there is no
//! way to find the next frame boundary after it.
//!
//! # Shutdown
//!
//! A `tokio::sync::watch` channel tells the accept loop and every session to
//! stop. [`SocketListener::shutdown`] waits for all sessions to detach, then
//! removes the socket file.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use genl_core::protocol::envelope::TRANSPORT_HEADER_SIZE;
use genl_core::TransportHeader;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::infrastructure::bus::MessageBus;

/// How long a closing session may spend flushing frames already queued.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Error type for socket setup.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reads one frame. Returns `None` on a clean end of stream.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidData`] if the header does not parse, or the
/// underlying I/O error.
pub(crate) async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; TRANSPORT_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let parsed = TransportHeader::parse(&header)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

    let mut frame = header.to_vec();
    frame.resize(parsed.len as usize, 0);
    reader.read_exact(&mut frame[TRANSPORT_HEADER_SIZE..]).await?;
    Ok(Some(frame))
}

// ── Generic accept loop ───────────────────────────────────────────────────────

/// A bound Unix socket with an accept loop that hands each connection to a
/// handler. Shared by the client listener and the trigger socket.
pub(crate) struct UnixServer {
    path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UnixServer {
    /// Binds `path` (replacing a stale socket file) and starts accepting.
    pub(crate) fn bind<F, Fut>(path: &Path, handler: F) -> Result<Self, ListenerError>
    where
        F: Fn(UnixStream, watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ListenerError::StaleSocket {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        let listener = UnixListener::bind(path).map_err(|source| ListenerError::Bind {
            path: path.to_path_buf(),
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, shutdown_rx));
        Ok(Self {
            path: path.to_path_buf(),
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting, waits for every connection handler to return, and
    /// removes the socket file. Later calls do nothing.
    pub(crate) async fn shutdown(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        // Receivers may already be gone if the accept loop died.
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            warn!("accept loop for {} ended abnormally: {e}", self.path.display());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove socket {}: {e}", self.path.display()),
        }
    }
}

async fn accept_loop<F, Fut>(
    listener: UnixListener,
    handler: F,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Fn(UnixStream, watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handler(stream, shutdown_rx.clone()));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            _ = shutdown_rx.changed() => break,
            // Reap finished connections so the set does not grow without bound.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

// ── Client listener ───────────────────────────────────────────────────────────

/// Accepts client sessions on a Unix socket and attaches each to the bus.
pub struct SocketListener {
    server: UnixServer,
}

impl SocketListener {
    /// Binds `path` and starts accepting sessions for `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] if the socket cannot be bound.
    pub fn bind(path: &Path, bus: Arc<MessageBus>) -> Result<Self, ListenerError> {
        let server = UnixServer::bind(path, move |stream, shutdown_rx| {
            serve_session(stream, Arc::clone(&bus), shutdown_rx)
        })?;
        info!("listening for client sessions on {}", path.display());
        Ok(Self { server })
    }

    pub fn path(&self) -> &Path {
        self.server.path()
    }

    /// Closes every session and removes the socket file. Idempotent.
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
        info!("client listener on {} stopped", self.server.path().display());
    }
}

async fn serve_session(stream: UnixStream, bus: Arc<MessageBus>, mut shutdown_rx: watch::Receiver<bool>) {
    let (port, mut outbound) = match bus.attach().await {
        Ok(attached) => attached,
        Err(e) => {
            warn!("rejecting client session: {e}");
            return;
        }
    };
    info!("client session attached as port {port}");

    let (mut reader, mut writer) = stream.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("write to port {port} failed: {e}");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => bus.ingress(port, frame).await,
                Ok(None) => break,
                Err(e) => {
                    warn!("closing session on port {port}: {e}");
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // Detaching drops the bus's sender, which ends the writer once the
    // queue is flushed.
    bus.detach(port).await;
    if tokio::time::timeout(FLUSH_TIMEOUT, writer_task).await.is_err() {
        debug!("port {port} did not flush within {FLUSH_TIMEOUT:?}");
    }
    info!("client session on port {port} closed");
}
