//! BroadcastEmitter: sends one notification to every subscriber of a group.
//!
//! A notification answers no request, so it carries sequence number 0 and
//! sender port 0. The group name is resolved against the registered family
//! at call time; emitting before registration (or after unregistration) is
//! an error, not a silent drop.

use std::sync::Arc;

use genl_core::protocol::attr::attr_total_size;
use genl_core::protocol::envelope::{DEFAULT_MESSAGE_SIZE, ENVELOPE_HEADER_SIZE, MAX_FRAME_SIZE};
use genl_core::{Attributes, Envelope, EnvelopeBuilder, ProtocolError};
use thiserror::Error;
use tracing::debug;

use crate::application::registry::{Family, FamilyRegistry};
use crate::application::transport::{FrameTransport, SendError};

/// Outcome of an emit that reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    /// Delivered to this many subscribers (at least one).
    Delivered(usize),
    /// The group exists but nobody is subscribed.
    NoSubscribers,
}

/// Error type for emit failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("family is not registered")]
    NotRegistered,
    #[error("family has no group named {0:?}")]
    UnknownGroup(String),
    #[error("failed to build notification: {0}")]
    Build(#[from] ProtocolError),
    #[error("transport failed to deliver notification: {0}")]
    Send(SendError),
}

pub struct BroadcastEmitter {
    registry: Arc<FamilyRegistry>,
    transport: Arc<dyn FrameTransport>,
}

impl BroadcastEmitter {
    pub fn new(registry: Arc<FamilyRegistry>, transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Builds a `cmd` notification carrying `attrs` and multicasts it to
    /// `group`.
    ///
    /// # Errors
    ///
    /// - [`EmitError::NotRegistered`] / [`EmitError::UnknownGroup`] if the
    ///   group cannot be resolved.
    /// - [`EmitError::Build`] if the attributes do not fit one frame.
    /// - [`EmitError::Send`] for transport failures. An empty group is not a
    ///   failure; it returns [`EmitStatus::NoSubscribers`].
    pub async fn emit(
        &self,
        group: &str,
        cmd: u8,
        attrs: &Attributes,
    ) -> Result<EmitStatus, EmitError> {
        let family = self.registry.family().await.ok_or(EmitError::NotRegistered)?;
        let group_id = family
            .group_id(group)
            .ok_or_else(|| EmitError::UnknownGroup(group.to_string()))?;

        let envelope = build_notification(&family, cmd, attrs)?;
        debug!(
            "emitting command {cmd} to group {group} ({group_id}), {} bytes",
            envelope.len()
        );

        match self.transport.multicast(group_id, envelope).await {
            Err(SendError::NoSubscribers(_)) => Ok(EmitStatus::NoSubscribers),
            Ok(n) => Ok(EmitStatus::Delivered(n)),
            Err(e) => Err(EmitError::Send(e)),
        }
    }
}

fn build_notification(
    family: &Family,
    cmd: u8,
    attrs: &Attributes,
) -> Result<Envelope, ProtocolError> {
    let needed = ENVELOPE_HEADER_SIZE
        + attrs
            .iter()
            .map(|(_, v)| attr_total_size(v.payload_len()))
            .sum::<usize>();
    let capacity = needed.clamp(DEFAULT_MESSAGE_SIZE, MAX_FRAME_SIZE);

    let mut builder =
        EnvelopeBuilder::begin_with_capacity(capacity, family.id(), family.version(), cmd, 0, 0, 0)?;
    for (id, value) in attrs.iter() {
        if let Err(e) = builder.put(id, value) {
            builder.cancel();
            return Err(e);
        }
    }
    Ok(builder.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::MockCommandHandler;
    use crate::application::registry::{FamilyDescriptor, Operation};
    use crate::application::transport::{FamilyAdvert, NamingError, NamingService, Publication};
    use async_trait::async_trait;
    use genl_core::family::ctrl::{FamilyInfo, GroupInfo};
    use genl_core::family::genltest::{echo_policy, Attr, Command};
    use genl_core::{AttrValue, ParsedEnvelope};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    // ── Test doubles ──────────────────────────────────────────────────────────

    struct FixedNaming;

    #[async_trait]
    impl NamingService for FixedNaming {
        async fn publish(&self, advert: FamilyAdvert) -> Result<Publication, NamingError> {
            let (_tx, inbox) = mpsc::channel(1);
            Ok(Publication {
                info: FamilyInfo {
                    id: 0x11,
                    name: advert.name,
                    version: 1,
                    max_attr: 1,
                    groups: vec![GroupInfo {
                        name: "mcgrp".to_string(),
                        id: 4,
                    }],
                },
                inbox,
            })
        }

        async fn withdraw(&self, _family_id: u16) -> Result<(), NamingError> {
            Ok(())
        }
    }

    /// Records multicast frames and answers with a fixed outcome.
    struct RecordingTransport {
        frames: Mutex<Vec<(u32, Envelope)>>,
        outcome: Result<usize, SendError>,
    }

    impl RecordingTransport {
        fn answering(outcome: Result<usize, SendError>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                outcome,
            })
        }
    }

    #[async_trait]
    impl FrameTransport for RecordingTransport {
        async fn unicast(&self, _port: u32, _frame: Envelope) -> Result<(), SendError> {
            Ok(())
        }

        async fn multicast(&self, group: u32, frame: Envelope) -> Result<usize, SendError> {
            self.frames.lock().unwrap().push((group, frame));
            self.outcome.clone()
        }
    }

    async fn registered() -> Arc<FamilyRegistry> {
        let registry = Arc::new(FamilyRegistry::new(Arc::new(FixedNaming)));
        registry
            .register(FamilyDescriptor {
                name: "genltest".to_string(),
                version: 1,
                max_attr: 1,
                operations: vec![Operation {
                    cmd: Command::Echo.id(),
                    policy: echo_policy(),
                    handler: Arc::new(MockCommandHandler::new()),
                }],
                groups: vec!["mcgrp".to_string()],
            })
            .await
            .unwrap();
        registry
    }

    fn msg(text: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(Attr::Msg.id(), AttrValue::from(text));
        attrs
    }

    #[tokio::test]
    async fn test_emit_builds_broadcast_envelope_for_resolved_group() {
        // Arrange
        let transport = RecordingTransport::answering(Ok(2));
        let emitter = BroadcastEmitter::new(registered().await, transport.clone());

        // Act
        let status = emitter
            .emit("mcgrp", Command::Echo.id(), &msg("hello"))
            .await
            .unwrap();

        // Assert
        assert_eq!(status, EmitStatus::Delivered(2));
        let frames = transport.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let (group, frame) = &frames[0];
        assert_eq!(*group, 4);
        let parsed = ParsedEnvelope::parse(frame.as_bytes(), Some(0x11)).unwrap();
        assert_eq!(parsed.header.seq, 0);
        assert_eq!(parsed.header.port, 0);
        assert_eq!(parsed.genl.cmd, Command::Echo.id());
        assert_eq!(
            parsed.attributes(&echo_policy()).unwrap().get_str(Attr::Msg.id()),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn test_emit_with_no_subscribers_is_distinct_status() {
        let transport = RecordingTransport::answering(Err(SendError::NoSubscribers(4)));
        let emitter = BroadcastEmitter::new(registered().await, transport);

        let status = emitter.emit("mcgrp", 1, &msg("hello")).await;

        assert_eq!(status, Ok(EmitStatus::NoSubscribers));
    }

    #[tokio::test]
    async fn test_emit_with_every_delivery_failing_is_not_no_subscribers() {
        // Arrange
        let failure = SendError::AllDeliveriesFailed { group: 4, attempted: 2 };
        let transport = RecordingTransport::answering(Err(failure.clone()));
        let emitter = BroadcastEmitter::new(registered().await, transport);

        // Act
        let status = emitter.emit("mcgrp", 1, &msg("hello")).await;

        // Assert
        assert_eq!(status, Err(EmitError::Send(failure)));
    }

    #[tokio::test]
    async fn test_emit_transport_failure_is_reported() {
        let transport = RecordingTransport::answering(Err(SendError::Closed));
        let emitter = BroadcastEmitter::new(registered().await, transport);

        let status = emitter.emit("mcgrp", 1, &msg("hello")).await;

        assert_eq!(status, Err(EmitError::Send(SendError::Closed)));
    }

    #[tokio::test]
    async fn test_emit_unknown_group_sends_nothing() {
        let transport = RecordingTransport::answering(Ok(1));
        let emitter = BroadcastEmitter::new(registered().await, transport.clone());

        let status = emitter.emit("other", 1, &msg("hello")).await;

        assert_eq!(status, Err(EmitError::UnknownGroup("other".to_string())));
        assert!(transport.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_before_registration_is_not_registered() {
        let registry = Arc::new(FamilyRegistry::new(Arc::new(FixedNaming)));
        let emitter = BroadcastEmitter::new(registry, RecordingTransport::answering(Ok(1)));

        let status = emitter.emit("mcgrp", 1, &msg("hello")).await;

        assert_eq!(status, Err(EmitError::NotRegistered));
    }

    #[tokio::test]
    async fn test_emit_large_message_grows_buffer() {
        let transport = RecordingTransport::answering(Ok(1));
        let emitter = BroadcastEmitter::new(registered().await, transport.clone());
        let text = "x".repeat(DEFAULT_MESSAGE_SIZE * 2);

        let status = emitter.emit("mcgrp", 1, &msg(&text)).await;

        assert_eq!(status, Ok(EmitStatus::Delivered(1)));
        let frames = transport.frames.lock().unwrap();
        assert!(frames[0].1.len() > DEFAULT_MESSAGE_SIZE);
    }
}
