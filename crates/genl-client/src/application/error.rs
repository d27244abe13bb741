//! Error type for the client side.

use std::path::PathBuf;
use std::time::Duration;

use genl_core::ProtocolError;
use thiserror::Error;

/// Errors a client session or one of its sockets can report.
///
/// Remote failures arrive on the wire as a negated errno; they are mapped to
/// a variant as soon as the error frame is parsed.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service socket could not be connected.
    #[error("failed to connect to {path}: {source}")]
    ConnectionFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The service has no family with this name.
    #[error("family {0:?} is not registered")]
    FamilyNotFound(String),

    #[error("family {family:?} has no group named {group:?}")]
    GroupNotFound { family: String, group: String },

    /// The service refused to add this session to the group.
    #[error("failed to join group {group} (errno {errno})")]
    JoinFailure { group: u32, errno: i32 },

    #[error("failed to send message: {0}")]
    SendFailure(#[source] std::io::Error),

    /// An envelope could not be built or an inbound frame could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A frame header did not parse. The stream position is lost, so the
    /// socket is closed.
    #[error("unreadable frame header, connection dropped: {0}")]
    Desync(#[source] ProtocolError),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service answered a request with an error frame.
    #[error("service reported errno {errno}")]
    Remote { errno: i32 },

    /// A frame arrived whose sequence number does not match the request in
    /// flight.
    #[error("sequence mismatch: expected {expected}, got {found}")]
    SeqMismatch { expected: u32, found: u32 },

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The socket was closed, locally or by the service.
    #[error("connection closed")]
    Closed,
}
