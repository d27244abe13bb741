//! Seams between the client session and the socket that carries it.
//!
//! The session lifecycle only needs these operations; the Unix-socket
//! implementation lives in `infrastructure::socket`, and tests substitute
//! scripted doubles.

use std::sync::Arc;

use async_trait::async_trait;
use genl_core::family::ctrl::FamilyInfo;
use genl_core::Envelope;

use crate::application::error::ClientError;
use crate::application::sink::{MessageSink, ReceivedMessage};

/// What one call to [`GenlTransport::recv_messages`] did with the frame it
/// read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A family message, already handed to the sink.
    Message(ReceivedMessage),
    /// An ACK or other transport control frame.
    Control,
    /// The frame failed to parse or failed the sequence check; the sink's
    /// `on_error` was told.
    Dropped,
}

/// One transport session to the service.
#[async_trait]
pub trait GenlTransport: Send {
    /// Allocates the sequence number for the next request.
    fn next_seq(&self) -> u32;

    /// Sends a finalized envelope. With sequence checking on, its sequence
    /// number becomes the one replies must carry.
    async fn send(&mut self, envelope: Envelope) -> Result<(), ClientError>;

    /// Accepts frames with any sequence number.
    fn disable_seq_check(&mut self);

    async fn resolve_family(&mut self, name: &str) -> Result<FamilyInfo, ClientError>;

    /// Resolves `group` of `family` to its runtime id.
    async fn resolve_group(&mut self, family: &str, group: &str) -> Result<u32, ClientError>;

    async fn add_membership(&mut self, group: u32) -> Result<(), ClientError>;

    fn set_sink(&mut self, sink: Arc<dyn MessageSink>);

    /// Reads and delivers one frame.
    ///
    /// Per-frame parse and sequence failures go to the sink and return
    /// [`Delivery::Dropped`]; only connection failures and error frames
    /// from the service are returned as `Err`.
    async fn recv_messages(&mut self) -> Result<Delivery, ClientError>;

    /// Closes the session. Later calls do nothing.
    async fn close(&mut self);
}

/// Opens transport sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: GenlTransport;

    async fn connect(&self) -> Result<Self::Transport, ClientError>;
}
