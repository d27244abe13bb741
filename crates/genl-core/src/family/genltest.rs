//! The `genltest` family: one command, one attribute, one broadcast group.
//!
//! Both the service and the client compile against these constants; nothing
//! here is negotiated at runtime except the numeric family and group ids,
//! which the client resolves by name through the controller.

use crate::protocol::attr::{AttrKind, AttrPolicy};

/// Family name as advertised by the controller.
pub const FAMILY_NAME: &str = "genltest";

/// Family version carried in every sub-header.
pub const FAMILY_VERSION: u8 = 1;

/// The single broadcast group.
pub const GROUP_NAME: &str = "mcgrp";

/// Highest command id.
pub const CMD_MAX: u8 = 1;

/// Highest attribute id.
pub const ATTR_MAX: u16 = 1;

/// Cap on text accepted by the service's trigger surface.
pub const MSG_MAX_LEN: usize = 1024;

/// Text the service puts in every ECHO reply.
pub const REPLY_TEXT: &str = "Hello from Kernel Space, Netlink!";

/// Text the client sends in its ECHO request.
pub const REQUEST_TEXT: &str = "Hello from User Space, Netlink!";

// ── Commands and attributes ───────────────────────────────────────────────────

/// Commands of the `genltest` family. Id 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Echo = 1,
}

impl Command {
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Echo),
            _ => Err(()),
        }
    }
}

/// Attributes of the `genltest` family. Id 0 is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Attr {
    /// NUL-terminated message text.
    Msg = 1,
}

impl Attr {
    pub fn id(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Attr {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Attr::Msg),
            _ => Err(()),
        }
    }
}

/// Policy for ECHO requests, replies, and notifications.
///
/// `Msg` is optional: a request without it is an empty message, not a
/// violation. No length cap is enforced on decode; the transport frame
/// limit bounds it.
pub fn echo_policy() -> AttrPolicy {
    AttrPolicy::new(ATTR_MAX).optional(Attr::Msg.id(), AttrKind::NulString { max_len: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_try_from_known_and_unknown() {
        assert_eq!(Command::try_from(1), Ok(Command::Echo));
        assert_eq!(Command::try_from(0), Err(()));
        assert_eq!(Command::try_from(CMD_MAX + 1), Err(()));
    }

    #[test]
    fn test_attr_try_from_known_and_unknown() {
        assert_eq!(Attr::try_from(1), Ok(Attr::Msg));
        assert_eq!(Attr::try_from(ATTR_MAX + 1), Err(()));
    }

    #[test]
    fn test_echo_policy_declares_msg_as_optional_string() {
        let policy = echo_policy();
        assert_eq!(policy.max_attr(), ATTR_MAX);
        assert_eq!(
            policy.kind_of(Attr::Msg.id()),
            Some(AttrKind::NulString { max_len: None })
        );
        assert!(policy.entries().iter().all(|e| !e.required));
    }

    #[test]
    fn test_family_name_fits_controller_limit() {
        assert!(FAMILY_NAME.len() < crate::family::ctrl::FAMILY_NAME_LEN);
    }
}
