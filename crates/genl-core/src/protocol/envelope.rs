//! Message envelope: transport header, protocol sub-header, attribute payload.
//!
//! Wire format:
//! ```text
//! [len:4][type:2][flags:2][seq:4][port:4]   transport header (16 bytes)
//! [cmd:1][version:1][reserved:2]            protocol sub-header (4 bytes)
//! [attribute records...]                    see `attr`
//! ```
//! All multi-byte integers are big-endian. `type` is the runtime family id
//! for family messages and a [`msg_type`] constant below
//! [`msg_type::MIN_FAMILY_ID`] for transport control messages.
//!
//! Envelopes are built with an [`EnvelopeBuilder`], which must end in exactly
//! one of [`EnvelopeBuilder::finalize`] or [`EnvelopeBuilder::cancel`]. Both
//! consume the builder, so an envelope can never be appended to after it has
//! been finalized.

use std::ops::Range;

use tracing::trace;

use crate::protocol::attr::{
    attr_total_size, decode_attrs, encode_attr, AttrPolicy, AttrValue, Attributes,
    ATTR_HEADER_SIZE, MAX_ATTR_LEN,
};
use crate::protocol::error::ProtocolError;

/// Size of the transport header.
pub const TRANSPORT_HEADER_SIZE: usize = 16;

/// Size of the protocol sub-header that follows the transport header.
pub const GENL_HEADER_SIZE: usize = 4;

/// Size of both headers together; the smallest valid family message.
pub const ENVELOPE_HEADER_SIZE: usize = TRANSPORT_HEADER_SIZE + GENL_HEADER_SIZE;

/// Buffer capacity used by [`EnvelopeBuilder::begin`].
pub const DEFAULT_MESSAGE_SIZE: usize = 4096;

/// Largest frame any reader accepts.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Values of the transport header `type` field.
pub mod msg_type {
    pub const NOOP: u16 = 0x1;
    /// Error report or acknowledgement; payload is `[errno:i32][request header]`.
    pub const ERROR: u16 = 0x2;
    pub const DONE: u16 = 0x3;
    pub const OVERRUN: u16 = 0x4;
    /// Join a broadcast group; payload is `[group:u32]`.
    pub const ADD_MEMBERSHIP: u16 = 0x5;
    /// Leave a broadcast group; payload is `[group:u32]`.
    pub const DROP_MEMBERSHIP: u16 = 0x6;
    /// Types at or above this value are family ids.
    pub const MIN_FAMILY_ID: u16 = 0x10;
}

/// Bits of the transport header `flags` field.
pub mod flags {
    pub const REQUEST: u16 = 0x1;
    pub const MULTI: u16 = 0x2;
    pub const ACK: u16 = 0x4;
    pub const ECHO: u16 = 0x8;
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// The 16-byte transport header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    /// Length of the whole frame, this header included.
    pub len: u32,
    pub msg_type: u16,
    pub flags: u16,
    /// Sequence number; replies echo the request's value.
    pub seq: u32,
    /// Sender port on requests, destination port on replies, 0 for broadcasts.
    pub port: u32,
}

impl TransportHeader {
    /// Parses the header at the start of `bytes`.
    ///
    /// Only the header itself is checked; `len` may exceed `bytes.len()`,
    /// which lets stream readers learn how many more bytes to read.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TransportHeaderInvalid`] if fewer than 16
    /// bytes are available or the length field is out of range.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < TRANSPORT_HEADER_SIZE {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "need at least {TRANSPORT_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let header = Self {
            len: read_u32(bytes, 0),
            msg_type: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: u16::from_be_bytes([bytes[6], bytes[7]]),
            seq: read_u32(bytes, 8),
            port: read_u32(bytes, 12),
        };
        let len = header.len as usize;
        if !(TRANSPORT_HEADER_SIZE..=MAX_FRAME_SIZE).contains(&len) {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "length field {len} outside {TRANSPORT_HEADER_SIZE}..={MAX_FRAME_SIZE}"
            )));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; TRANSPORT_HEADER_SIZE] {
        let mut out = [0u8; TRANSPORT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.len.to_be_bytes());
        out[4..6].copy_from_slice(&self.msg_type.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags.to_be_bytes());
        out[8..12].copy_from_slice(&self.seq.to_be_bytes());
        out[12..16].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// `true` for family messages, `false` for transport control messages.
    pub fn is_family_message(&self) -> bool {
        self.msg_type >= msg_type::MIN_FAMILY_ID
    }

    /// Overwrites the port field of an encoded frame in place.
    ///
    /// The transport stamps the real sender port on ingress, so clients can
    /// leave it at 0.
    pub fn stamp_port(frame: &mut [u8], port: u32) {
        if frame.len() >= TRANSPORT_HEADER_SIZE {
            frame[12..16].copy_from_slice(&port.to_be_bytes());
        }
    }
}

/// The 4-byte protocol sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlHeader {
    pub cmd: u8,
    pub version: u8,
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// A partially built envelope.
///
/// # Examples
///
/// ```rust
/// use genl_core::protocol::envelope::{EnvelopeBuilder, ParsedEnvelope};
///
/// let mut builder = EnvelopeBuilder::begin(0x11, 1, 1, 7, 0, 0).unwrap();
/// builder.put_string(1, "ping").unwrap();
/// let envelope = builder.finalize();
///
/// let parsed = ParsedEnvelope::parse(envelope.as_bytes(), Some(0x11)).unwrap();
/// assert_eq!(parsed.header.seq, 7);
/// assert_eq!(parsed.genl.cmd, 1);
/// ```
#[derive(Debug)]
#[must_use = "an envelope builder must be finalized or cancelled"]
pub struct EnvelopeBuilder {
    buf: Vec<u8>,
    capacity: usize,
}

impl EnvelopeBuilder {
    /// Starts an envelope with a [`DEFAULT_MESSAGE_SIZE`] buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::AllocationFailure`] if the buffer cannot be reserved.
    pub fn begin(
        family_id: u16,
        version: u8,
        cmd: u8,
        seq: u32,
        port: u32,
        flags: u16,
    ) -> Result<Self, ProtocolError> {
        Self::begin_with_capacity(DEFAULT_MESSAGE_SIZE, family_id, version, cmd, seq, port, flags)
    }

    /// Starts an envelope whose total size may not exceed `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::AllocationFailure`] if `capacity` cannot hold
    /// both headers, exceeds [`MAX_FRAME_SIZE`], or cannot be reserved.
    pub fn begin_with_capacity(
        capacity: usize,
        family_id: u16,
        version: u8,
        cmd: u8,
        seq: u32,
        port: u32,
        flags: u16,
    ) -> Result<Self, ProtocolError> {
        if !(ENVELOPE_HEADER_SIZE..=MAX_FRAME_SIZE).contains(&capacity) {
            return Err(ProtocolError::AllocationFailure {
                requested: ENVELOPE_HEADER_SIZE,
                capacity,
            });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| ProtocolError::AllocationFailure {
                requested: capacity,
                capacity,
            })?;

        let header = TransportHeader {
            len: 0, // fixed by finalize
            msg_type: family_id,
            flags,
            seq,
            port,
        };
        buf.extend_from_slice(&header.to_bytes());
        buf.push(cmd);
        buf.push(version);
        buf.extend_from_slice(&[0, 0]); // reserved

        Ok(Self { buf, capacity })
    }

    /// Appends one attribute and returns its byte span within the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] if the record does not fit.
    /// The builder is left unchanged and must still be finalized or cancelled.
    pub fn put(&mut self, id: u16, value: &AttrValue) -> Result<Range<usize>, ProtocolError> {
        let record_len = ATTR_HEADER_SIZE + value.payload_len();
        let needed = self.buf.len() + attr_total_size(value.payload_len());
        if record_len > MAX_ATTR_LEN || needed > self.capacity {
            return Err(ProtocolError::MessageTooLarge {
                needed,
                capacity: self.capacity,
            });
        }
        encode_attr(&mut self.buf, id, value)
    }

    pub fn put_string(&mut self, id: u16, value: &str) -> Result<Range<usize>, ProtocolError> {
        self.put(id, &AttrValue::Str(value.to_string()))
    }

    pub fn put_u16(&mut self, id: u16, value: u16) -> Result<Range<usize>, ProtocolError> {
        self.put(id, &AttrValue::U16(value))
    }

    pub fn put_u32(&mut self, id: u16, value: u32) -> Result<Range<usize>, ProtocolError> {
        self.put(id, &AttrValue::U32(value))
    }

    /// Appends an attribute whose payload is a pre-encoded run of records.
    pub fn put_nested(&mut self, id: u16, records: Vec<u8>) -> Result<Range<usize>, ProtocolError> {
        self.put(id, &AttrValue::Nested(records))
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() == ENVELOPE_HEADER_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fixes the length field and returns the immutable envelope.
    pub fn finalize(mut self) -> Envelope {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_be_bytes());
        Envelope { bytes: self.buf }
    }

    /// Discards the partially built envelope and releases its buffer.
    pub fn cancel(self) {
        trace!("cancelled envelope after {} of {} bytes", self.buf.len(), self.capacity);
    }
}

// ── Finished envelopes ────────────────────────────────────────────────────────

/// A finalized frame, ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    bytes: Vec<u8>,
}

impl Envelope {
    /// Wraps already-encoded frame bytes. Used for transport control frames
    /// built outside [`EnvelopeBuilder`].
    pub(crate) fn from_encoded(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn header(&self) -> TransportHeader {
        TransportHeader {
            len: read_u32(&self.bytes, 0),
            msg_type: u16::from_be_bytes([self.bytes[4], self.bytes[5]]),
            flags: u16::from_be_bytes([self.bytes[6], self.bytes[7]]),
            seq: read_u32(&self.bytes, 8),
            port: read_u32(&self.bytes, 12),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A received family message split into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedEnvelope<'a> {
    pub header: TransportHeader,
    pub genl: GenlHeader,
    /// The attribute records, without headers.
    pub payload: &'a [u8],
}

impl<'a> ParsedEnvelope<'a> {
    /// Splits `bytes` into transport header, sub-header, and attribute payload.
    ///
    /// When `expected_family` is given, the family id in the header must match it.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TransportHeaderInvalid`] if the buffer is shorter than
    ///   the headers, the length field disagrees with the buffer, or the frame
    ///   is a transport control message.
    /// - [`ProtocolError::FamilyMismatch`] if the family id is not the expected one.
    pub fn parse(bytes: &'a [u8], expected_family: Option<u16>) -> Result<Self, ProtocolError> {
        let header = TransportHeader::parse(bytes)?;
        let len = header.len as usize;
        if len > bytes.len() {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "declared length {len} exceeds {} available bytes",
                bytes.len()
            )));
        }
        if !header.is_family_message() {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "type {:#x} is a transport control message",
                header.msg_type
            )));
        }
        if let Some(expected) = expected_family {
            if header.msg_type != expected {
                return Err(ProtocolError::FamilyMismatch {
                    expected,
                    found: header.msg_type,
                });
            }
        }
        if len < ENVELOPE_HEADER_SIZE {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "frame of {len} bytes has no protocol sub-header"
            )));
        }

        let genl = GenlHeader {
            cmd: bytes[TRANSPORT_HEADER_SIZE],
            version: bytes[TRANSPORT_HEADER_SIZE + 1],
        };
        Ok(Self {
            header,
            genl,
            payload: &bytes[ENVELOPE_HEADER_SIZE..len],
        })
    }

    /// Decodes the payload against `policy`.
    pub fn attributes(&self, policy: &AttrPolicy) -> Result<Attributes, ProtocolError> {
        decode_attrs(self.payload, policy)
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
