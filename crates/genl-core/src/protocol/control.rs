//! Transport control frames: acknowledgements, error reports, and group
//! membership requests.
//!
//! These frames carry a [`msg_type`] below [`msg_type::MIN_FAMILY_ID`] and no
//! protocol sub-header. Error frames are the only place an errno value
//! appears; [`parse_control`] turns it into a [`ControlMessage`] variant
//! straight away, so callers never handle signed integers.

use crate::protocol::envelope::{
    flags, msg_type, Envelope, TransportHeader, TRANSPORT_HEADER_SIZE,
};
use crate::protocol::error::ProtocolError;

/// No such family or group.
pub const ENOENT: i32 = 2;
/// Bad message contents.
pub const EINVAL: i32 = 22;

/// Size of an error frame: header + errno + the request's header.
pub const ERROR_FRAME_SIZE: usize = TRANSPORT_HEADER_SIZE + 4 + TRANSPORT_HEADER_SIZE;

/// Size of a membership frame: header + group id.
pub const MEMBERSHIP_FRAME_SIZE: usize = TRANSPORT_HEADER_SIZE + 4;

/// A decoded transport control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// The request identified by `request` succeeded.
    Ack { request: TransportHeader },
    /// The request identified by `request` failed with a positive `errno`.
    Error { errno: i32, request: TransportHeader },
    AddMembership { group: u32 },
    DropMembership { group: u32 },
    Noop,
    Done,
    Overrun,
}

/// Builds an error report for `request`, addressed to `dest_port`.
///
/// `errno` is positive; it travels negated, and 0 means success.
pub fn error_frame(errno: i32, request: &TransportHeader, dest_port: u32) -> Envelope {
    let header = TransportHeader {
        len: ERROR_FRAME_SIZE as u32,
        msg_type: msg_type::ERROR,
        flags: 0,
        seq: request.seq,
        port: dest_port,
    };
    let mut bytes = Vec::with_capacity(ERROR_FRAME_SIZE);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&(-errno).to_be_bytes());
    bytes.extend_from_slice(&request.to_bytes());
    Envelope::from_encoded(bytes)
}

/// Builds a positive acknowledgement for `request`.
pub fn ack_frame(request: &TransportHeader, dest_port: u32) -> Envelope {
    error_frame(0, request, dest_port)
}

/// Builds a join (`add = true`) or leave request for `group`.
pub fn membership_frame(add: bool, group: u32, seq: u32) -> Envelope {
    let header = TransportHeader {
        len: MEMBERSHIP_FRAME_SIZE as u32,
        msg_type: if add {
            msg_type::ADD_MEMBERSHIP
        } else {
            msg_type::DROP_MEMBERSHIP
        },
        flags: flags::REQUEST | flags::ACK,
        seq,
        port: 0,
    };
    let mut bytes = Vec::with_capacity(MEMBERSHIP_FRAME_SIZE);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&group.to_be_bytes());
    Envelope::from_encoded(bytes)
}

/// Parses a transport control frame.
///
/// # Errors
///
/// Returns [`ProtocolError::TransportHeaderInvalid`] if the frame is a
/// family message, has an unknown control type, or its payload is truncated.
pub fn parse_control(bytes: &[u8]) -> Result<(TransportHeader, ControlMessage), ProtocolError> {
    let header = TransportHeader::parse(bytes)?;
    let len = header.len as usize;
    if len > bytes.len() {
        return Err(ProtocolError::TransportHeaderInvalid(format!(
            "declared length {len} exceeds {} available bytes",
            bytes.len()
        )));
    }
    let payload = &bytes[TRANSPORT_HEADER_SIZE..len];

    let message = match header.msg_type {
        msg_type::NOOP => ControlMessage::Noop,
        msg_type::DONE => ControlMessage::Done,
        msg_type::OVERRUN => ControlMessage::Overrun,
        msg_type::ERROR => {
            require(payload, 4 + TRANSPORT_HEADER_SIZE, "error frame")?;
            let code = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let request = TransportHeader::parse(&payload[4..])?;
            if code == 0 {
                ControlMessage::Ack { request }
            } else {
                ControlMessage::Error {
                    errno: code.saturating_abs(),
                    request,
                }
            }
        }
        msg_type::ADD_MEMBERSHIP | msg_type::DROP_MEMBERSHIP => {
            require(payload, 4, "membership frame")?;
            let group = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            if header.msg_type == msg_type::ADD_MEMBERSHIP {
                ControlMessage::AddMembership { group }
            } else {
                ControlMessage::DropMembership { group }
            }
        }
        other => {
            return Err(ProtocolError::TransportHeaderInvalid(format!(
                "type {other:#x} is not a transport control message"
            )))
        }
    };
    Ok((header, message))
}

fn require(payload: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if payload.len() < needed {
        Err(ProtocolError::TransportHeaderInvalid(format!(
            "{context}: need {needed} payload bytes, got {}",
            payload.len()
        )))
    } else {
        Ok(())
    }
}
