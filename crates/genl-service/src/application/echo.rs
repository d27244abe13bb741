//! The ECHO command and the `genltest` family descriptor.

use std::sync::Arc;

use genl_core::family::genltest::{
    echo_policy, Attr, Command, ATTR_MAX, FAMILY_NAME, FAMILY_VERSION, GROUP_NAME, REPLY_TEXT,
};
use genl_core::Envelope;
use tracing::{error, info};

use crate::application::handler::{CommandHandler, HandlerError, Request};
use crate::application::registry::{FamilyDescriptor, Operation};

/// Logs the request's MSG text and replies with a fixed greeting.
///
/// A request without MSG is an empty message, not an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn handle(&self, request: &Request) -> Result<Option<Envelope>, HandlerError> {
        match request.attrs.get_str(Attr::Msg.id()) {
            Some(text) => info!("message received: {text}"),
            None => info!("empty message received"),
        }

        let mut reply = request.begin_reply(Command::Echo.id()).map_err(|e| {
            error!("failed to allocate reply buffer: {e}");
            e
        })?;
        if let Err(e) = reply.put_string(Attr::Msg.id(), REPLY_TEXT) {
            error!("failed to create reply message string: {e}");
            reply.cancel();
            return Err(e.into());
        }
        Ok(Some(reply.finalize()))
    }
}

/// The `genltest` family: ECHO bound to [`EchoHandler`], one group `mcgrp`.
pub fn family_descriptor() -> FamilyDescriptor {
    FamilyDescriptor {
        name: FAMILY_NAME.to_string(),
        version: FAMILY_VERSION,
        max_attr: ATTR_MAX,
        operations: vec![Operation {
            cmd: Command::Echo.id(),
            policy: echo_policy(),
            handler: Arc::new(EchoHandler),
        }],
        groups: vec![GROUP_NAME.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genl_core::{AttrValue, Attributes, ParsedEnvelope};

    fn request(msg: Option<&str>) -> Request {
        let mut attrs = Attributes::new();
        if let Some(text) = msg {
            attrs.insert(Attr::Msg.id(), AttrValue::from(text));
        }
        Request {
            family_id: 0x11,
            version: FAMILY_VERSION,
            cmd: Command::Echo.id(),
            seq: 17,
            sender: 5,
            attrs,
        }
    }

    fn reply_text(reply: &Envelope) -> String {
        ParsedEnvelope::parse(reply.as_bytes(), Some(0x11))
            .unwrap()
            .attributes(&echo_policy())
            .unwrap()
            .get_str(Attr::Msg.id())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_echo_replies_with_greeting_to_sender_and_seq() {
        // Arrange
        let handler = EchoHandler;

        // Act
        let reply = handler.handle(&request(Some("ping"))).unwrap().unwrap();

        // Assert
        let header = reply.header();
        assert_eq!(header.msg_type, 0x11);
        assert_eq!(header.seq, 17);
        assert_eq!(header.port, 5);
        assert_eq!(reply_text(&reply), REPLY_TEXT);
    }

    #[test]
    fn test_echo_without_msg_is_empty_message_and_still_replies() {
        let reply = EchoHandler.handle(&request(None)).unwrap();
        assert_eq!(reply.map(|r| reply_text(&r)).as_deref(), Some(REPLY_TEXT));
    }

    #[test]
    fn test_family_descriptor_matches_shared_schema() {
        let desc = family_descriptor();
        assert_eq!(desc.name, "genltest");
        assert_eq!(desc.version, 1);
        assert_eq!(desc.max_attr, 1);
        assert_eq!(desc.groups, vec!["mcgrp".to_string()]);
        assert_eq!(desc.operations.len(), 1);
        assert_eq!(desc.operations[0].cmd, Command::Echo.id());
    }
}
