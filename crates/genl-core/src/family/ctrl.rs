//! The controller family: the naming service that maps family names to
//! runtime ids and lists each family's broadcast groups.
//!
//! The controller lives at a fixed id, so it is the one family a client can
//! talk to before resolving anything. A `GETFAMILY` request names a family;
//! the reply is a `NEWFAMILY` message describing it:
//!
//! ```text
//! FAMILY_ID     u16
//! FAMILY_NAME   NUL-terminated string
//! VERSION       u32
//! MAXATTR       u32
//! MCAST_GROUPS  nested: one entry per group, keyed 1..=n
//!                 MCAST_GRP_NAME  NUL-terminated string
//!                 MCAST_GRP_ID    u32
//! ```

use crate::protocol::attr::{decode_attrs, encode_attr, AttrKind, AttrPolicy, AttrValue};
use crate::protocol::envelope::{flags, Envelope, EnvelopeBuilder, ParsedEnvelope};
use crate::protocol::error::ProtocolError;

/// Fixed id of the controller family.
pub const CTRL_FAMILY_ID: u16 = 0x10;
pub const CTRL_FAMILY_NAME: &str = "nlctrl";
pub const CTRL_VERSION: u8 = 2;

/// First id handed to a registered family.
pub const FIRST_FAMILY_ID: u16 = 0x11;
/// First id handed to a broadcast group.
pub const FIRST_GROUP_ID: u32 = 1;

/// Family and group names are limited to this many bytes, terminator included.
pub const FAMILY_NAME_LEN: usize = 16;

// Commands
pub const CMD_NEWFAMILY: u8 = 1;
pub const CMD_GETFAMILY: u8 = 3;

// Top-level attributes
pub const ATTR_FAMILY_ID: u16 = 1;
pub const ATTR_FAMILY_NAME: u16 = 2;
pub const ATTR_VERSION: u16 = 3;
pub const ATTR_MAXATTR: u16 = 5;
pub const ATTR_MCAST_GROUPS: u16 = 7;
pub const ATTR_MAX: u16 = 7;

// Attributes inside one MCAST_GROUPS entry
pub const GRP_ATTR_NAME: u16 = 1;
pub const GRP_ATTR_ID: u16 = 2;
pub const GRP_ATTR_MAX: u16 = 2;

fn name_kind() -> AttrKind {
    AttrKind::NulString {
        max_len: Some(FAMILY_NAME_LEN - 1),
    }
}

/// Policy for `GETFAMILY` requests: a name or an id, at least one of them.
pub fn getfamily_policy() -> AttrPolicy {
    AttrPolicy::new(ATTR_MAX)
        .optional(ATTR_FAMILY_ID, AttrKind::U16)
        .optional(ATTR_FAMILY_NAME, name_kind())
}

/// Policy for `NEWFAMILY` replies.
pub fn family_policy() -> AttrPolicy {
    AttrPolicy::new(ATTR_MAX)
        .required(ATTR_FAMILY_ID, AttrKind::U16)
        .required(ATTR_FAMILY_NAME, name_kind())
        .optional(ATTR_VERSION, AttrKind::U32)
        .optional(ATTR_MAXATTR, AttrKind::U32)
        .optional(ATTR_MCAST_GROUPS, AttrKind::Nested)
}

/// Policy for one entry of the `MCAST_GROUPS` list.
pub fn group_policy() -> AttrPolicy {
    AttrPolicy::new(GRP_ATTR_MAX)
        .required(GRP_ATTR_NAME, name_kind())
        .required(GRP_ATTR_ID, AttrKind::U32)
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// Which family a `GETFAMILY` request asks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyQuery {
    ByName(String),
    ById(u16),
}

impl FamilyQuery {
    /// Extracts the query from a parsed `GETFAMILY` request. A name wins
    /// over an id when both are present.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedAttribute`] if the payload does not
    /// decode, or [`ProtocolError::MissingAttribute`] if it names nothing.
    pub fn parse(request: &ParsedEnvelope<'_>) -> Result<Self, ProtocolError> {
        let attrs = request.attributes(&getfamily_policy())?;
        if let Some(name) = attrs.get_str(ATTR_FAMILY_NAME) {
            return Ok(FamilyQuery::ByName(name.to_string()));
        }
        attrs
            .get_u16(ATTR_FAMILY_ID)
            .map(FamilyQuery::ById)
            .ok_or(ProtocolError::MissingAttribute(ATTR_FAMILY_NAME))
    }
}

/// Builds a `GETFAMILY` request for `name`.
pub fn getfamily_request(name: &str, seq: u32) -> Result<Envelope, ProtocolError> {
    let mut builder =
        EnvelopeBuilder::begin(CTRL_FAMILY_ID, CTRL_VERSION, CMD_GETFAMILY, seq, 0, flags::REQUEST)?;
    if let Err(e) = builder.put_string(ATTR_FAMILY_NAME, name) {
        builder.cancel();
        return Err(e);
    }
    Ok(builder.finalize())
}

// ── Family descriptions ───────────────────────────────────────────────────────

/// A broadcast group as the controller advertises it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub id: u32,
}

/// A registered family as the controller advertises it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyInfo {
    pub id: u16,
    pub name: String,
    pub version: u32,
    pub max_attr: u32,
    pub groups: Vec<GroupInfo>,
}

impl FamilyInfo {
    /// Returns the runtime id of the group called `name`.
    pub fn group_id(&self, name: &str) -> Option<u32> {
        self.groups.iter().find(|g| g.name == name).map(|g| g.id)
    }

    /// Encodes this description as a `NEWFAMILY` reply to `seq`, addressed
    /// to `dest_port`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] if the group list does not
    /// fit one envelope. The partial envelope is discarded.
    pub fn encode_reply(&self, seq: u32, dest_port: u32) -> Result<Envelope, ProtocolError> {
        let mut builder =
            EnvelopeBuilder::begin(CTRL_FAMILY_ID, CTRL_VERSION, CMD_NEWFAMILY, seq, dest_port, 0)?;
        match self.put_attrs(&mut builder) {
            Ok(()) => Ok(builder.finalize()),
            Err(e) => {
                builder.cancel();
                Err(e)
            }
        }
    }

    fn put_attrs(&self, builder: &mut EnvelopeBuilder) -> Result<(), ProtocolError> {
        builder.put_u16(ATTR_FAMILY_ID, self.id)?;
        builder.put_string(ATTR_FAMILY_NAME, &self.name)?;
        builder.put_u32(ATTR_VERSION, self.version)?;
        builder.put_u32(ATTR_MAXATTR, self.max_attr)?;
        if !self.groups.is_empty() {
            let mut list = Vec::new();
            for (index, group) in self.groups.iter().enumerate() {
                let mut entry = Vec::new();
                encode_attr(&mut entry, GRP_ATTR_NAME, &AttrValue::Str(group.name.clone()))?;
                encode_attr(&mut entry, GRP_ATTR_ID, &AttrValue::U32(group.id))?;
                encode_attr(&mut list, (index + 1) as u16, &AttrValue::Nested(entry))?;
            }
            builder.put_nested(ATTR_MCAST_GROUPS, list)?;
        }
        Ok(())
    }

    /// Decodes a `NEWFAMILY` reply.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TransportHeaderInvalid`] / [`ProtocolError::FamilyMismatch`]
    ///   if `bytes` is not a controller message.
    /// - [`ProtocolError::MalformedAttribute`] if the reply is not `NEWFAMILY`
    ///   or any attribute fails to decode.
    /// - [`ProtocolError::MissingAttribute`] if the id or name is absent.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let parsed = ParsedEnvelope::parse(bytes, Some(CTRL_FAMILY_ID))?;
        if parsed.genl.cmd != CMD_NEWFAMILY {
            return Err(ProtocolError::MalformedAttribute(format!(
                "expected controller command {CMD_NEWFAMILY}, got {}",
                parsed.genl.cmd
            )));
        }
        let attrs = parsed.attributes(&family_policy())?;

        let mut groups = Vec::new();
        if let Some(list) = attrs.get_bytes(ATTR_MCAST_GROUPS) {
            let entries = decode_attrs(list, &AttrPolicy::permissive())?;
            for (_, entry) in entries.iter() {
                let AttrValue::Raw(raw) = entry else {
                    continue;
                };
                let group = decode_attrs(raw, &group_policy())?;
                groups.push(GroupInfo {
                    name: group.get_str(GRP_ATTR_NAME).unwrap_or_default().to_string(),
                    id: group.get_u32(GRP_ATTR_ID).unwrap_or_default(),
                });
            }
        }

        Ok(Self {
            id: attrs.get_u16(ATTR_FAMILY_ID).unwrap_or_default(),
            name: attrs.get_str(ATTR_FAMILY_NAME).unwrap_or_default().to_string(),
            version: attrs.get_u32(ATTR_VERSION).unwrap_or_default(),
            max_attr: attrs.get_u32(ATTR_MAXATTR).unwrap_or_default(),
            groups,
        })
    }
}
