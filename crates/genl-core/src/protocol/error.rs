//! Error type shared by the attribute codec and the message envelope.

use thiserror::Error;

/// Errors that can occur while building or parsing a message.
///
/// Every codec failure is reported as one of these variants. Raw errno values
/// never leave the wire layer; see [`crate::protocol::control`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The builder could not reserve room for the headers.
    #[error("cannot reserve {requested} bytes in a message buffer of capacity {capacity}")]
    AllocationFailure { requested: usize, capacity: usize },

    /// Appending an attribute would overflow the message buffer.
    #[error("message too large: need {needed} bytes, capacity is {capacity}")]
    MessageTooLarge { needed: usize, capacity: usize },

    /// The buffer is too short for the headers, or the length field is inconsistent.
    #[error("invalid transport header: {0}")]
    TransportHeaderInvalid(String),

    /// An attribute record is truncated, out of range, or of the wrong kind.
    #[error("malformed attribute: {0}")]
    MalformedAttribute(String),

    /// The policy marks an attribute as required but the message does not carry it.
    #[error("required attribute {0} is missing")]
    MissingAttribute(u16),

    /// The envelope belongs to a different family than the one resolved.
    #[error("family mismatch: expected id {expected}, got {found}")]
    FamilyMismatch { expected: u16, found: u16 },
}
