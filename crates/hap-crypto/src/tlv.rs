//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across multiple TLVs.

use hap_core::error::ParseError;

/// Maximum value length of a single TLV8 record.
pub const MAX_FRAGMENT: usize = 255;

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    SessionId = 0x0E,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Error codes carried in a `TlvType::Error` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Backoff = 0x03,
    MaxPeers = 0x04,
    MaxTries = 0x05,
    Unavailable = 0x06,
    Busy = 0x07,
}

/// Encode an ordered list of entries.
///
/// Empty values produce a zero-length record. Long values are split into
/// contiguous 255-byte records of the same type.
pub fn encode(entries: &[(u8, &[u8])]) -> Vec<u8> {
    let mut result = Vec::with_capacity(entries.iter().map(|(_, v)| v.len() + 2).sum());

    for (typ, value) in entries {
        if value.is_empty() {
            result.push(*typ);
            result.push(0);
            continue;
        }
        for chunk in value.chunks(MAX_FRAGMENT) {
            result.push(*typ);
            result.push(chunk.len() as u8);
            result.extend_from_slice(chunk);
        }
    }

    result
}

/// TLV8 message with entries kept in insertion (or first-seen) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Every record of a given type is appended to that type's value in
    /// stream order, whether or not the records are adjacent.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut tlv = Self::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::TruncatedHeader { offset: i });
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::TruncatedValue {
                    expected: len,
                    available: data.len() - i,
                });
            }

            tlv.merge(typ, &data[i..i + len]);
            i += len;
        }

        Ok(tlv)
    }

    fn merge(&mut self, typ: u8, value: &[u8]) {
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => existing.extend_from_slice(value),
            None => self.items.push((typ, value.to_vec())),
        }
    }

    /// Encode to bytes in insertion order.
    pub fn encode(&self) -> Vec<u8> {
        let entries: Vec<(u8, &[u8])> = self
            .items
            .iter()
            .map(|(t, v)| (*t, v.as_slice()))
            .collect();
        encode(&entries)
    }

    /// Get value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Get value for type, failing if absent.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], ParseError> {
        self.get(typ).ok_or(ParseError::MissingField(typ.name()))
    }

    /// Get a fixed-size value, failing if absent or of the wrong length.
    pub fn require_array<const N: usize>(&self, typ: TlvType) -> Result<[u8; N], ParseError> {
        let value = self.require(typ)?;
        value.try_into().map_err(|_| ParseError::InvalidLength {
            field: typ.name(),
            expected: N,
            actual: value.len(),
        })
    }

    /// Set value for type, replacing any previous value in place.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.set_raw(typ as u8, value);
    }

    /// Set value for raw type.
    pub fn set_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ, value)),
        }
    }

    /// Builder form of [`Tlv8::set`].
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    /// Builder shortcut for the state record.
    pub fn with_state(self, state: u8) -> Self {
        self.with(TlvType::State, vec![state])
    }

    /// Builder shortcut for the error record.
    pub fn with_error(self, error: TlvError) -> Self {
        self.with(TlvType::Error, vec![error as u8])
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Number of distinct types.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over (type, value) pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.items.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x0E => Some(Self::SessionId),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }

    /// Field name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Identifier => "identifier",
            Self::Salt => "salt",
            Self::PublicKey => "public key",
            Self::Proof => "proof",
            Self::EncryptedData => "encrypted data",
            Self::State => "state",
            Self::Error => "error",
            Self::RetryDelay => "retry delay",
            Self::Certificate => "certificate",
            Self::Signature => "signature",
            Self::Permissions => "permissions",
            Self::FragmentData => "fragment data",
            Self::FragmentLast => "fragment last",
            Self::SessionId => "session id",
            Self::Flags => "flags",
            Self::Separator => "separator",
        }
    }
}

impl TlvError {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Authentication => "Authentication",
            Self::Backoff => "Backoff (rate limited)",
            Self::MaxPeers => "MaxPeers",
            Self::MaxTries => "MaxTries",
            Self::Unavailable => "Unavailable",
            Self::Busy => "Busy",
        }
    }
}
