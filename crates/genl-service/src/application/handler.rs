//! The command-handler seam: what a family operation runs once its request
//! has been parsed and validated.

use genl_core::{Attributes, Envelope, EnvelopeBuilder, ProtocolError};
use thiserror::Error;

/// A validated request, as handed to a [`CommandHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Runtime id of the family the request was addressed to.
    pub family_id: u16,
    /// Version of the registered family (not the version the sender claimed).
    pub version: u8,
    pub cmd: u8,
    pub seq: u32,
    /// Port of the requesting session.
    pub sender: u32,
    pub attrs: Attributes,
}

impl Request {
    /// Starts a reply to this request: same family, addressed to the sender,
    /// carrying the request's sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::AllocationFailure`] if no buffer can be reserved.
    pub fn begin_reply(&self, cmd: u8) -> Result<EnvelopeBuilder, ProtocolError> {
        EnvelopeBuilder::begin(self.family_id, self.version, cmd, self.seq, self.sender, 0)
    }
}

/// Failures a handler reports to the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("failed to build reply: {0}")]
    Reply(#[from] ProtocolError),
    #[error("{0}")]
    Failed(String),
}

/// Runs one family command.
///
/// Handlers are synchronous and run to completion for each request; a
/// handler that needs shared state brings its own synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait CommandHandler: Send + Sync {
    /// Handles `request`, optionally returning a unicast reply.
    fn handle(&self, request: &Request) -> Result<Option<Envelope>, HandlerError>;
}
