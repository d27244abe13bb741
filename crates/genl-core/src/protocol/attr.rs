//! Attribute codec: typed, tagged values carried in a message payload.
//!
//! Wire format of one attribute record:
//! ```text
//! [len:2][type:2][payload:len-4][pad to 4-byte boundary]
//! ```
//! `len` counts the 4-byte record header plus the payload, but not the
//! padding. All multi-byte integers are big-endian.
//!
//! Decoding is driven by an [`AttrPolicy`]: ids declared in the policy are
//! validated strictly against their [`AttrKind`], ids the policy does not
//! mention are kept as raw bytes, and any id above the policy's maximum is
//! rejected. Attribute ids and kinds are fixed at build time on both ends of
//! the protocol; nothing about the schema is negotiated at runtime.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::protocol::error::ProtocolError;

/// Size of the `[len][type]` record header.
pub const ATTR_HEADER_SIZE: usize = 4;

/// Attribute records start on multiples of this many bytes.
pub const ATTR_ALIGNTO: usize = 4;

/// Largest record length the 16-bit length field can express.
pub const MAX_ATTR_LEN: usize = u16::MAX as usize;

/// Rounds `len` up to the next attribute boundary.
pub const fn attr_align(len: usize) -> usize {
    (len + ATTR_ALIGNTO - 1) & !(ATTR_ALIGNTO - 1)
}

/// Number of bytes one record with a `payload_len`-byte payload occupies,
/// padding included.
pub const fn attr_total_size(payload_len: usize) -> usize {
    attr_align(ATTR_HEADER_SIZE + payload_len)
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// The value kinds the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// UTF-8 text followed by a terminating zero byte.
    ///
    /// `max_len` bounds the text length (terminator excluded) when set.
    NulString { max_len: Option<usize> },
    /// Big-endian `u16`.
    U16,
    /// Big-endian `u32`.
    U32,
    /// A payload that is itself a sequence of attribute records.
    Nested,
}

/// One declared attribute in a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEntry {
    pub id: u16,
    pub kind: AttrKind,
    pub required: bool,
}

/// Validation rules for the attributes of one command.
///
/// # Examples
///
/// ```rust
/// use genl_core::protocol::attr::{AttrKind, AttrPolicy};
///
/// let policy = AttrPolicy::new(1).optional(1, AttrKind::NulString { max_len: None });
/// assert_eq!(policy.max_attr(), 1);
/// assert!(policy.kind_of(1).is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrPolicy {
    max_attr: u16,
    entries: Vec<PolicyEntry>,
}

impl AttrPolicy {
    /// Creates an empty policy accepting ids up to and including `max_attr`.
    pub fn new(max_attr: u16) -> Self {
        Self {
            max_attr,
            entries: Vec::new(),
        }
    }

    /// A policy that accepts every id and declares none; every record decodes
    /// as [`AttrValue::Raw`]. Used to walk the index-keyed entries of a
    /// nested list.
    pub fn permissive() -> Self {
        Self::new(u16::MAX)
    }

    /// Declares an attribute that may be absent.
    pub fn optional(self, id: u16, kind: AttrKind) -> Self {
        self.declare(id, kind, false)
    }

    /// Declares an attribute that must be present.
    pub fn required(self, id: u16, kind: AttrKind) -> Self {
        self.declare(id, kind, true)
    }

    fn declare(mut self, id: u16, kind: AttrKind, required: bool) -> Self {
        debug_assert!(id != 0, "attribute id 0 is reserved");
        debug_assert!(id <= self.max_attr, "attribute id {id} above policy maximum");
        self.entries.retain(|e| e.id != id);
        self.entries.push(PolicyEntry { id, kind, required });
        self
    }

    pub fn max_attr(&self) -> u16 {
        self.max_attr
    }

    /// Returns the declared kind for `id`, or `None` if the policy is silent.
    pub fn kind_of(&self, id: u16) -> Option<AttrKind> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.kind)
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// One decoded attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    U16(u16),
    U32(u32),
    /// Undecoded payload of a nested attribute; decode it with the nested policy.
    Nested(Vec<u8>),
    /// Payload of an id the policy does not declare.
    Raw(Vec<u8>),
}

impl AttrValue {
    /// Length of the payload this value encodes to, padding excluded.
    pub fn payload_len(&self) -> usize {
        match self {
            AttrValue::Str(s) => s.len() + 1,
            AttrValue::U16(_) => 2,
            AttrValue::U32(_) => 4,
            AttrValue::Nested(b) | AttrValue::Raw(b) => b.len(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

/// Decoded attributes of one message, keyed by id.
///
/// Receivers look attributes up by id; the order they appeared on the wire
/// is not preserved. An absent id is distinct from an empty value:
/// `get_str` returns `None` for the former and `Some("")` for the latter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    values: BTreeMap<u16, AttrValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any earlier value with the same id.
    pub fn insert(&mut self, id: u16, value: AttrValue) {
        self.values.insert(id, value);
    }

    pub fn get(&self, id: u16) -> Option<&AttrValue> {
        self.values.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.values.contains_key(&id)
    }

    pub fn get_str(&self, id: u16) -> Option<&str> {
        match self.values.get(&id) {
            Some(AttrValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_u16(&self, id: u16) -> Option<u16> {
        match self.values.get(&id) {
            Some(AttrValue::U16(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, id: u16) -> Option<u32> {
        match self.values.get(&id) {
            Some(AttrValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a nested or raw attribute.
    pub fn get_bytes(&self, id: u16) -> Option<&[u8]> {
        match self.values.get(&id) {
            Some(AttrValue::Nested(b)) | Some(AttrValue::Raw(b)) => Some(b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &AttrValue)> {
        self.values.iter().map(|(id, v)| (*id, v))
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Appends one attribute record and returns the byte span it occupies,
/// padding included.
///
/// Callers that must respect a buffer capacity check
/// [`attr_total_size`] first; see `EnvelopeBuilder`.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLarge`] if the record would not fit
/// the 16-bit length field. `buf` is left unchanged.
pub fn encode_attr(
    buf: &mut Vec<u8>,
    id: u16,
    value: &AttrValue,
) -> Result<Range<usize>, ProtocolError> {
    let record_len = ATTR_HEADER_SIZE + value.payload_len();
    let len = u16::try_from(record_len).map_err(|_| ProtocolError::MessageTooLarge {
        needed: record_len,
        capacity: MAX_ATTR_LEN,
    })?;
    let start = buf.len();
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&id.to_be_bytes());
    match value {
        AttrValue::Str(s) => {
            buf.extend_from_slice(s.as_bytes());
            buf.push(0);
        }
        AttrValue::U16(v) => buf.extend_from_slice(&v.to_be_bytes()),
        AttrValue::U32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        AttrValue::Nested(b) | AttrValue::Raw(b) => buf.extend_from_slice(b),
    }
    buf.resize(start + attr_align(buf.len() - start), 0);
    Ok(start..buf.len())
}

/// Appends a NUL-terminated string attribute.
///
/// # Errors
///
/// See [`encode_attr`].
pub fn encode_string(
    buf: &mut Vec<u8>,
    id: u16,
    value: &str,
) -> Result<Range<usize>, ProtocolError> {
    encode_attr(buf, id, &AttrValue::Str(value.to_string()))
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes every attribute record in `buf` against `policy`.
///
/// Records with the reserved id 0 are skipped. When an id occurs more than
/// once the last occurrence wins.
///
/// # Errors
///
/// - [`ProtocolError::MalformedAttribute`] if a record is truncated, declares
///   a length that reads past the end of `buf`, carries an id above
///   `policy.max_attr()`, or disagrees with the kind the policy declares.
/// - [`ProtocolError::MissingAttribute`] if a required attribute is absent.
///
/// # Examples
///
/// ```rust
/// use genl_core::protocol::attr::{decode_attrs, encode_string, AttrKind, AttrPolicy};
///
/// let policy = AttrPolicy::new(1).optional(1, AttrKind::NulString { max_len: None });
/// let mut buf = Vec::new();
/// encode_string(&mut buf, 1, "ping").unwrap();
/// let attrs = decode_attrs(&buf, &policy).unwrap();
/// assert_eq!(attrs.get_str(1), Some("ping"));
/// ```
pub fn decode_attrs(buf: &[u8], policy: &AttrPolicy) -> Result<Attributes, ProtocolError> {
    let mut attrs = Attributes::new();
    let mut offset = 0;

    while offset < buf.len() {
        let remaining = buf.len() - offset;
        if remaining < ATTR_HEADER_SIZE {
            return Err(ProtocolError::MalformedAttribute(format!(
                "{remaining} trailing bytes at offset {offset} cannot hold a record header"
            )));
        }

        let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
        let id = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);

        if len < ATTR_HEADER_SIZE || len > remaining {
            return Err(ProtocolError::MalformedAttribute(format!(
                "record at offset {offset} declares length {len}, {remaining} bytes available"
            )));
        }
        if id > policy.max_attr() {
            return Err(ProtocolError::MalformedAttribute(format!(
                "attribute id {id} exceeds maximum {}",
                policy.max_attr()
            )));
        }

        let payload = &buf[offset + ATTR_HEADER_SIZE..offset + len];
        if id != 0 {
            let value = match policy.kind_of(id) {
                Some(kind) => decode_value(id, kind, payload)?,
                None => AttrValue::Raw(payload.to_vec()),
            };
            attrs.insert(id, value);
        }

        // The final record may legitimately omit its padding.
        offset = (offset + attr_align(len)).min(buf.len());
    }

    for entry in policy.entries().iter().filter(|e| e.required) {
        if !attrs.contains(entry.id) {
            return Err(ProtocolError::MissingAttribute(entry.id));
        }
    }

    Ok(attrs)
}

fn decode_value(id: u16, kind: AttrKind, payload: &[u8]) -> Result<AttrValue, ProtocolError> {
    match kind {
        AttrKind::NulString { max_len } => {
            if payload.last() != Some(&0) {
                return Err(ProtocolError::MalformedAttribute(format!(
                    "attribute {id}: string is not NUL-terminated"
                )));
            }
            // Content ends at the first terminator, as a C reader would see it.
            let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
            let text = &payload[..end];
            if let Some(max) = max_len {
                if text.len() > max {
                    return Err(ProtocolError::MalformedAttribute(format!(
                        "attribute {id}: string of {} bytes exceeds limit {max}",
                        text.len()
                    )));
                }
            }
            let s = std::str::from_utf8(text).map_err(|e| {
                ProtocolError::MalformedAttribute(format!("attribute {id}: invalid UTF-8: {e}"))
            })?;
            Ok(AttrValue::Str(s.to_string()))
        }
        AttrKind::U16 => {
            require_payload(id, payload, 2)?;
            Ok(AttrValue::U16(u16::from_be_bytes([payload[0], payload[1]])))
        }
        AttrKind::U32 => {
            require_payload(id, payload, 4)?;
            Ok(AttrValue::U32(u32::from_be_bytes([
                payload[0], payload[1], payload[2], payload[3],
            ])))
        }
        AttrKind::Nested => Ok(AttrValue::Nested(payload.to_vec())),
    }
}

fn require_payload(id: u16, payload: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if payload.len() < needed {
        Err(ProtocolError::MalformedAttribute(format!(
            "attribute {id}: need {needed} payload bytes, got {}",
            payload.len()
        )))
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MSG: u16 = 1;

    fn string_policy() -> AttrPolicy {
        AttrPolicy::new(1).optional(MSG, AttrKind::NulString { max_len: None })
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "ping").unwrap();
        let attrs = decode_attrs(&buf, &string_policy()).expect("decode failed");
        assert_eq!(attrs.get_str(MSG), Some("ping"));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_oversized_record_is_rejected_and_buffer_untouched() {
        // Arrange – 65532 payload bytes + 4 header bytes overflow the u16 length
        let mut buf = vec![0xAB];
        let value = AttrValue::Raw(vec![0; MAX_ATTR_LEN - ATTR_HEADER_SIZE + 1]);

        // Act
        let result = encode_attr(&mut buf, MSG, &value);

        // Assert
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { needed, capacity: MAX_ATTR_LEN })
                if needed == MAX_ATTR_LEN + 1
        ));
        assert_eq!(buf, vec![0xAB]);
    }

    #[test]
    fn test_largest_record_still_encodes() {
        let mut buf = Vec::new();
        let value = AttrValue::Raw(vec![0; MAX_ATTR_LEN - ATTR_HEADER_SIZE]);

        let span = encode_attr(&mut buf, MSG, &value).unwrap();

        assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), u16::MAX);
        assert_eq!(span.len(), attr_align(MAX_ATTR_LEN));
    }

    #[test]
    fn test_string_record_layout_includes_terminator_and_padding() {
        let mut buf = Vec::new();
        let span = encode_string(&mut buf, MSG, "hello").unwrap();

        // 4 header + 5 text + 1 NUL = 10, padded to 12
        assert_eq!(span, 0..12);
        assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), 10);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), MSG);
        assert_eq!(&buf[4..9], b"hello");
        assert_eq!(buf[9], 0);
        assert_eq!(&buf[10..12], &[0, 0]);
    }

    #[test]
    fn test_empty_string_is_present_but_empty() {
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "").unwrap();
        let attrs = decode_attrs(&buf, &string_policy()).unwrap();
        assert_eq!(attrs.get_str(MSG), Some(""));
    }

    #[test]
    fn test_empty_buffer_decodes_to_no_attributes() {
        let attrs = decode_attrs(&[], &string_policy()).unwrap();
        assert!(attrs.is_empty());
        assert_eq!(attrs.get_str(MSG), None);
    }

    #[test]
    fn test_id_above_maximum_is_rejected() {
        let mut buf = Vec::new();
        encode_string(&mut buf, 7, "x").unwrap();
        let result = decode_attrs(&buf, &string_policy());
        assert!(matches!(result, Err(ProtocolError::MalformedAttribute(_))));
    }

    #[test]
    fn test_length_past_end_is_rejected() {
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "ping").unwrap();
        buf[0..2].copy_from_slice(&200u16.to_be_bytes());
        let result = decode_attrs(&buf, &string_policy());
        assert!(matches!(result, Err(ProtocolError::MalformedAttribute(_))));
    }

    #[test]
    fn test_length_below_header_is_rejected() {
        let buf = [0x00, 0x02, 0x00, 0x01];
        let result = decode_attrs(&buf, &string_policy());
        assert!(matches!(result, Err(ProtocolError::MalformedAttribute(_))));
    }

    #[test]
    fn test_truncated_record_header_is_rejected() {
        let result = decode_attrs(&[0x00, 0x08], &string_policy());
        assert!(matches!(result, Err(ProtocolError::MalformedAttribute(_))));
    }

    #[test]
    fn test_unterminated_string_is_rejected() {
        let mut buf = Vec::new();
        encode_attr(&mut buf, MSG, &AttrValue::Raw(b"abcd".to_vec())).unwrap();
        let result = decode_attrs(&buf, &string_policy());
        assert!(matches!(result, Err(ProtocolError::MalformedAttribute(_))));
    }

    #[test]
    fn test_string_stops_at_first_terminator() {
        let mut buf = Vec::new();
        encode_attr(&mut buf, MSG, &AttrValue::Raw(b"ab\0cd\0".to_vec())).unwrap();
        let attrs = decode_attrs(&buf, &string_policy()).unwrap();
        assert_eq!(attrs.get_str(MSG), Some("ab"));
    }

    #[test]
    fn test_string_longer_than_policy_limit_is_rejected() {
        let policy = AttrPolicy::new(1).optional(MSG, AttrKind::NulString { max_len: Some(3) });
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "four").unwrap();
        assert!(matches!(
            decode_attrs(&buf, &policy),
            Err(ProtocolError::MalformedAttribute(_))
        ));
    }

    #[test]
    fn test_undeclared_id_is_kept_as_raw() {
        let policy = AttrPolicy::new(4).optional(MSG, AttrKind::NulString { max_len: None });
        let mut buf = Vec::new();
        encode_attr(&mut buf, 3, &AttrValue::Raw(vec![0xAA, 0xBB])).unwrap();
        encode_string(&mut buf, MSG, "kept").unwrap();
        let attrs = decode_attrs(&buf, &policy).unwrap();
        assert_eq!(attrs.get_bytes(3), Some(&[0xAA, 0xBB][..]));
        assert_eq!(attrs.get_str(MSG), Some("kept"));
    }

    #[test]
    fn test_reserved_id_zero_is_skipped() {
        let mut buf = Vec::new();
        encode_attr(&mut buf, 0, &AttrValue::U32(9)).unwrap();
        let attrs = decode_attrs(&buf, &string_policy()).unwrap();
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_missing_required_attribute_is_reported() {
        let policy = AttrPolicy::new(2)
            .required(2, AttrKind::U32)
            .optional(MSG, AttrKind::NulString { max_len: None });
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "only").unwrap();
        assert_eq!(
            decode_attrs(&buf, &policy),
            Err(ProtocolError::MissingAttribute(2))
        );
    }

    #[test]
    fn test_integer_kinds_round_trip() {
        let policy = AttrPolicy::new(2)
            .optional(1, AttrKind::U16)
            .optional(2, AttrKind::U32);
        let mut buf = Vec::new();
        encode_attr(&mut buf, 1, &AttrValue::U16(0x0102)).unwrap();
        encode_attr(&mut buf, 2, &AttrValue::U32(0xDEAD_BEEF)).unwrap();
        let attrs = decode_attrs(&buf, &policy).unwrap();
        assert_eq!(attrs.get_u16(1), Some(0x0102));
        assert_eq!(attrs.get_u32(2), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_short_integer_payload_is_rejected() {
        let policy = AttrPolicy::new(1).optional(1, AttrKind::U32);
        let mut buf = Vec::new();
        encode_attr(&mut buf, 1, &AttrValue::U16(5)).unwrap();
        assert!(matches!(
            decode_attrs(&buf, &policy),
            Err(ProtocolError::MalformedAttribute(_))
        ));
    }

    #[test]
    fn test_nested_payload_decodes_with_inner_policy() {
        let inner_policy = AttrPolicy::new(1).optional(1, AttrKind::NulString { max_len: None });
        let outer_policy = AttrPolicy::new(1).optional(1, AttrKind::Nested);

        let mut inner = Vec::new();
        encode_string(&mut inner, 1, "inner").unwrap();
        let mut buf = Vec::new();
        encode_attr(&mut buf, 1, &AttrValue::Nested(inner)).unwrap();

        let outer = decode_attrs(&buf, &outer_policy).unwrap();
        let nested = decode_attrs(outer.get_bytes(1).unwrap(), &inner_policy).unwrap();
        assert_eq!(nested.get_str(1), Some("inner"));
    }

    #[test]
    fn test_last_duplicate_wins() {
        let mut buf = Vec::new();
        encode_string(&mut buf, MSG, "first").unwrap();
        encode_string(&mut buf, MSG, "second").unwrap();
        let attrs = decode_attrs(&buf, &string_policy()).unwrap();
        assert_eq!(attrs.get_str(MSG), Some("second"));
    }

    #[test]
    fn test_attr_align_rounds_up_to_four() {
        assert_eq!(attr_align(0), 0);
        assert_eq!(attr_align(1), 4);
        assert_eq!(attr_align(4), 4);
        assert_eq!(attr_align(5), 8);
    }
}
