//! # genl-core
//!
//! Shared library for the genltest service and client: the attribute codec,
//! the message envelope, transport control frames, sequence numbering, and
//! the schemas of the `genltest` and controller families.
//!
//! This crate performs no I/O. It is used by both host crates so that the
//! wire format and every attribute id exist in exactly one place.
//!
//! # Architecture overview
//!
//! A message travelling between client and service looks like this:
//!
//! ```text
//! transport header   len, type (family id), flags, seq, port
//! sub-header         cmd, version
//! attributes         [len][id][payload][pad] ...
//! ```
//!
//! - **`protocol`** – How bytes travel. [`EnvelopeBuilder`] writes a message,
//!   [`ParsedEnvelope`] splits one back into headers and payload, and
//!   [`decode_attrs`] validates the payload against an [`AttrPolicy`].
//!
//! - **`family`** – What the bytes mean. The `genltest` family defines one
//!   command (ECHO), one attribute (MSG), and one broadcast group (`mcgrp`).
//!   The controller family lets a client turn the name `genltest` into the
//!   numeric id the service assigned at registration.

pub mod family;
pub mod protocol;

pub use protocol::attr::{decode_attrs, AttrKind, AttrPolicy, AttrValue, Attributes};
pub use protocol::envelope::{Envelope, EnvelopeBuilder, ParsedEnvelope, TransportHeader};
pub use protocol::error::ProtocolError;
pub use protocol::sequence::SequenceCounter;
