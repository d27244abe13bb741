//! Wire protocol: attribute codec, message envelope, transport control
//! frames, and sequence numbering.

pub mod attr;
pub mod control;
pub mod envelope;
pub mod error;
pub mod sequence;

pub use attr::{decode_attrs, AttrKind, AttrPolicy, AttrValue, Attributes};
pub use control::{parse_control, ControlMessage};
pub use envelope::{Envelope, EnvelopeBuilder, GenlHeader, ParsedEnvelope, TransportHeader};
pub use error::ProtocolError;
pub use sequence::SequenceCounter;
