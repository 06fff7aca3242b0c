//! Modbus/TCP framing.
//!
//! Only the MBAP header is inspected: the transaction id for routing and the
//! length field for delimiting. Everything after the header is forwarded as-is.

use bytes::Bytes;
use thiserror::Error;

/// Bytes preceding the region counted by the MBAP length field
/// (transaction id, protocol id, length).
pub const MBAP_PREFIX_LEN: usize = 6;

/// Full MBAP header including the unit id.
pub const MBAP_HEADER_LEN: usize = 7;

/// Largest legal MBAP length value: unit id (1) + max PDU (253).
pub const MAX_MBAP_LENGTH: u16 = 254;

/// Largest legal Modbus/TCP frame on the wire.
pub const MAX_FRAME_LEN: usize = MBAP_PREFIX_LEN + MAX_MBAP_LENGTH as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: {len} bytes, need at least {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("invalid MBAP length field {declared} (expected 1..=254)")]
    InvalidLength { declared: u16 },

    #[error("frame length mismatch: header declares {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MBAP_HEADER_LEN {
            return Err(FrameError::Truncated {
                len: bytes.len(),
                needed: MBAP_HEADER_LEN,
            });
        }
        let length = u16::from_be_bytes([bytes[4], bytes[5]]);
        if length == 0 || length > MAX_MBAP_LENGTH {
            return Err(FrameError::InvalidLength { declared: length });
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length,
            unit_id: bytes[6],
        })
    }

    /// Total bytes the frame occupies on the wire.
    pub fn frame_len(&self) -> usize {
        MBAP_PREFIX_LEN + self.length as usize
    }
}

/// Reads the big-endian transaction id from the first two bytes.
pub fn transaction_id(bytes: &[u8]) -> Result<u16, FrameError> {
    match bytes {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(FrameError::Truncated {
            len: bytes.len(),
            needed: 2,
        }),
    }
}

/// Size of the frame starting at `buf`, once enough of the header is buffered.
///
/// Returns `Ok(None)` while fewer than [`MBAP_PREFIX_LEN`] bytes are available.
pub fn declared_frame_len(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    if buf.len() < MBAP_PREFIX_LEN {
        return Ok(None);
    }
    let length = u16::from_be_bytes([buf[4], buf[5]]);
    if length == 0 || length > MAX_MBAP_LENGTH {
        return Err(FrameError::InvalidLength { declared: length });
    }
    Ok(Some(MBAP_PREFIX_LEN + length as usize))
}

/// One complete Modbus/TCP frame. The bytes are never rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
    transaction_id: u16,
}

impl Frame {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, FrameError> {
        let bytes = bytes.into();
        let header = MbapHeader::parse(&bytes)?;
        if header.frame_len() != bytes.len() {
            return Err(FrameError::LengthMismatch {
                expected: header.frame_len(),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            transaction_id: header.transaction_id,
            bytes,
        })
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    pub fn unit_id(&self) -> u8 {
        self.bytes[MBAP_HEADER_LEN - 1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
