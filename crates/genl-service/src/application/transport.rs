//! Seams between the protocol use cases and the transport that carries them.
//!
//! The registry publishes families through a [`NamingService`]; the
//! dispatcher's replies and the emitter's broadcasts leave through a
//! [`FrameTransport`]. The in-process message bus implements both; tests
//! substitute recording doubles.

use async_trait::async_trait;
use genl_core::family::ctrl::FamilyInfo;
use genl_core::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;

/// One inbound family message together with the port that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub bytes: Vec<u8>,
    pub sender: u32,
}

/// What a family asks the naming service to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyAdvert {
    pub name: String,
    pub version: u8,
    pub max_attr: u16,
    pub groups: Vec<String>,
}

/// A successful publication: the advertised description (with runtime ids
/// filled in) and the queue the transport delivers the family's messages to.
#[derive(Debug)]
pub struct Publication {
    pub info: FamilyInfo,
    pub inbox: mpsc::Receiver<Inbound>,
}

/// Failures of the naming service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("a family named {0:?} is already registered")]
    NameConflict(String),
    #[error("family {family_id:#x} still has {subscribers} subscriber(s)")]
    StillInUse { family_id: u16, subscribers: usize },
    #[error("no family with id {0:#x}")]
    UnknownFamily(u16),
    #[error("family id space exhausted")]
    IdsExhausted,
    #[error("transport is closed")]
    Closed,
}

/// Failures of point-to-point and broadcast delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The group exists but nobody has joined it. Not a transport fault.
    #[error("group {0} has no subscribers")]
    NoSubscribers(u32),
    #[error("no group with id {0}")]
    UnknownGroup(u32),
    #[error("port {0} is not attached")]
    UnknownPort(u32),
    #[error("queue of port {0} is full")]
    QueueFull(u32),
    /// The group had subscribers but none of their queues took the frame.
    #[error("no subscriber of group {group} accepted the frame ({attempted} tried)")]
    AllDeliveriesFailed { group: u32, attempted: usize },
    #[error("transport is closed")]
    Closed,
}

/// Publishes and withdraws families.
#[async_trait]
pub trait NamingService: Send + Sync {
    /// Assigns runtime ids and starts routing the family's messages.
    async fn publish(&self, advert: FamilyAdvert) -> Result<Publication, NamingError>;

    /// Stops advertising the family. Refused with
    /// [`NamingError::StillInUse`] while any of its groups has subscribers.
    async fn withdraw(&self, family_id: u16) -> Result<(), NamingError>;
}

/// Delivers finalized envelopes.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Sends `frame` to one port.
    async fn unicast(&self, port: u32, frame: Envelope) -> Result<(), SendError>;

    /// Sends `frame` to every current subscriber of `group` and returns how
    /// many received it. An empty group is [`SendError::NoSubscribers`]; a
    /// group whose subscribers all failed to take the frame is
    /// [`SendError::AllDeliveriesFailed`], so `Ok` is never 0.
    async fn multicast(&self, group: u32, frame: Envelope) -> Result<usize, SendError>;
}
