//! CommandDispatcher: turns one inbound request into at most one reply.
//!
//! ```text
//! raw bytes ─► parse envelope ─► look up command ─► validate attributes ─► handler
//!                  │                   │                    │                 │
//!                Parse           UnknownCommand      PolicyViolation       Handler
//! ```
//!
//! Every failure is returned to the caller and no reply is produced; the
//! caller logs it and drops the message. The dispatcher never retries.

use std::sync::Arc;

use genl_core::{Envelope, ParsedEnvelope, ProtocolError};
use thiserror::Error;
use tracing::debug;

use crate::application::handler::{HandlerError, Request};
use crate::application::registry::Family;

/// Error type for dispatch failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The bytes are not a message of this family.
    #[error("unparseable message: {0}")]
    Parse(ProtocolError),
    #[error("no handler bound to command {0}")]
    UnknownCommand(u8),
    #[error("command {cmd} rejected by policy: {source}")]
    PolicyViolation {
        cmd: u8,
        #[source]
        source: ProtocolError,
    },
    #[error("handler for command {cmd} failed: {source}")]
    Handler {
        cmd: u8,
        #[source]
        source: HandlerError,
    },
}

/// Routes requests for one registered family to its handlers.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    family: Arc<Family>,
}

impl CommandDispatcher {
    pub fn new(family: Arc<Family>) -> Self {
        Self { family }
    }

    pub fn family(&self) -> &Arc<Family> {
        &self.family
    }

    /// Handles one inbound message from port `sender`.
    ///
    /// Returns the handler's reply, already addressed to `sender` with the
    /// request's sequence number, or `None` if the handler produced none.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]; no handler runs unless parsing and policy
    /// validation both succeed.
    pub fn on_receive(&self, raw: &[u8], sender: u32) -> Result<Option<Envelope>, DispatchError> {
        let parsed =
            ParsedEnvelope::parse(raw, Some(self.family.id())).map_err(DispatchError::Parse)?;
        let cmd = parsed.genl.cmd;

        let operation = self
            .family
            .operation(cmd)
            .ok_or(DispatchError::UnknownCommand(cmd))?;

        let attrs = parsed
            .attributes(&operation.policy)
            .map_err(|source| DispatchError::PolicyViolation { cmd, source })?;

        let request = Request {
            family_id: self.family.id(),
            version: self.family.version(),
            cmd,
            seq: parsed.header.seq,
            sender,
            attrs,
        };
        debug!(
            "dispatching command {cmd} seq {} from port {sender}",
            request.seq
        );

        operation
            .handler
            .handle(&request)
            .map_err(|source| DispatchError::Handler { cmd, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::MockCommandHandler;
    use crate::application::registry::{FamilyDescriptor, FamilyRegistry, Operation};
    use crate::application::transport::{
        FamilyAdvert, NamingError, NamingService, Publication,
    };
    use async_trait::async_trait;
    use genl_core::family::ctrl::{FamilyInfo, GroupInfo};
    use genl_core::family::genltest::{echo_policy, Attr, Command};
    use genl_core::protocol::envelope::{flags, ENVELOPE_HEADER_SIZE};
    use genl_core::EnvelopeBuilder;
    use tokio::sync::mpsc;

    const FAMILY_ID: u16 = 0x11;

    struct FixedNaming;

    #[async_trait]
    impl NamingService for FixedNaming {
        async fn publish(&self, advert: FamilyAdvert) -> Result<Publication, NamingError> {
            let (_tx, inbox) = mpsc::channel(1);
            Ok(Publication {
                info: FamilyInfo {
                    id: FAMILY_ID,
                    name: advert.name,
                    version: u32::from(advert.version),
                    max_attr: u32::from(advert.max_attr),
                    groups: vec![GroupInfo {
                        name: "mcgrp".to_string(),
                        id: 1,
                    }],
                },
                inbox,
            })
        }

        async fn withdraw(&self, _family_id: u16) -> Result<(), NamingError> {
            Ok(())
        }
    }

    async fn dispatcher_with(handler: MockCommandHandler) -> CommandDispatcher {
        let registry = FamilyRegistry::new(Arc::new(FixedNaming));
        let (family, _inbox) = registry
            .register(FamilyDescriptor {
                name: "genltest".to_string(),
                version: 1,
                max_attr: 1,
                operations: vec![Operation {
                    cmd: Command::Echo.id(),
                    policy: echo_policy(),
                    handler: Arc::new(handler),
                }],
                groups: vec!["mcgrp".to_string()],
            })
            .await
            .unwrap();
        CommandDispatcher::new(family)
    }

    fn request(cmd: u8, msg: Option<&str>) -> Vec<u8> {
        let mut builder = EnvelopeBuilder::begin(FAMILY_ID, 1, cmd, 42, 0, flags::REQUEST).unwrap();
        if let Some(text) = msg {
            builder.put_string(Attr::Msg.id(), text).unwrap();
        }
        builder.finalize().into_bytes()
    }

    fn reply_to(request: &Request) -> Envelope {
        let mut builder = request.begin_reply(Command::Echo.id()).unwrap();
        builder.put_string(Attr::Msg.id(), "pong").unwrap();
        builder.finalize()
    }

    #[tokio::test]
    async fn test_valid_request_reaches_handler_with_decoded_attributes() {
        // Arrange
        let mut handler = MockCommandHandler::new();
        handler
            .expect_handle()
            .withf(|req| {
                req.cmd == 1
                    && req.seq == 42
                    && req.sender == 7
                    && req.attrs.get_str(1) == Some("ping")
            })
            .times(1)
            .returning(|req| Ok(Some(reply_to(req))));
        let dispatcher = dispatcher_with(handler).await;

        // Act
        let reply = dispatcher
            .on_receive(&request(1, Some("ping")), 7)
            .unwrap()
            .expect("handler returned a reply");

        // Assert
        let header = reply.header();
        assert_eq!(header.msg_type, FAMILY_ID);
        assert_eq!(header.seq, 42);
        assert_eq!(header.port, 7);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected_before_handler() {
        // Arrange
        let mut handler = MockCommandHandler::new();
        handler.expect_handle().times(0);
        let dispatcher = dispatcher_with(handler).await;

        // Act
        let result = dispatcher.on_receive(&request(9, Some("ping")), 1);

        // Assert
        assert_eq!(result, Err(DispatchError::UnknownCommand(9)));
    }

    #[tokio::test]
    async fn test_attribute_above_maximum_is_policy_violation() {
        // Arrange
        let mut handler = MockCommandHandler::new();
        handler.expect_handle().times(0);
        let dispatcher = dispatcher_with(handler).await;
        let mut builder = EnvelopeBuilder::begin(FAMILY_ID, 1, 1, 1, 0, 0).unwrap();
        builder.put_string(5, "too high").unwrap();
        let bytes = builder.finalize().into_bytes();

        // Act
        let result = dispatcher.on_receive(&bytes, 1);

        // Assert
        assert!(matches!(
            result,
            Err(DispatchError::PolicyViolation {
                cmd: 1,
                source: ProtocolError::MalformedAttribute(_)
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_buffer_is_parse_error() {
        let mut handler = MockCommandHandler::new();
        handler.expect_handle().times(0);
        let dispatcher = dispatcher_with(handler).await;
        let bytes = request(1, Some("ping"));

        let result = dispatcher.on_receive(&bytes[..ENVELOPE_HEADER_SIZE - 1], 1);

        assert!(matches!(
            result,
            Err(DispatchError::Parse(ProtocolError::TransportHeaderInvalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_message_for_other_family_is_parse_error() {
        let mut handler = MockCommandHandler::new();
        handler.expect_handle().times(0);
        let dispatcher = dispatcher_with(handler).await;
        let bytes = EnvelopeBuilder::begin(FAMILY_ID + 1, 1, 1, 1, 0, 0)
            .unwrap()
            .finalize()
            .into_bytes();

        let result = dispatcher.on_receive(&bytes, 1);

        assert!(matches!(
            result,
            Err(DispatchError::Parse(ProtocolError::FamilyMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_optional_attribute_still_reaches_handler() {
        // Arrange
        let mut handler = MockCommandHandler::new();
        handler
            .expect_handle()
            .withf(|req| req.attrs.is_empty())
            .times(1)
            .returning(|_| Ok(None));
        let dispatcher = dispatcher_with(handler).await;

        // Act
        let result = dispatcher.on_receive(&request(1, None), 3);

        // Assert
        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_handler_failure_is_reported_not_retried() {
        // Arrange
        let mut handler = MockCommandHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(HandlerError::Failed("out of buffers".to_string())));
        let dispatcher = dispatcher_with(handler).await;

        // Act
        let result = dispatcher.on_receive(&request(1, Some("x")), 3);

        // Assert
        assert_eq!(
            result,
            Err(DispatchError::Handler {
                cmd: 1,
                source: HandlerError::Failed("out of buffers".to_string())
            })
        );
    }
}
