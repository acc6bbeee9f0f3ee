//! Frame format for messages crossing a process boundary.
//!
//! Frame format: `[length:4][checksum:4][kind:2][handles:2][payload:N]`
//!
//! - **length**: Total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (kind + handles + payload)
//! - **kind**: [`MessageKind`](crate::message::MessageKind) discriminant
//! - **handles**: Number of descriptors sent as ancillary data (0 or 1)
//! - **payload**: Codec-encoded message body
//!
//! The descriptor itself never appears in the bytes; the transport attaches
//! it out of band and the receiver checks the count against the header.

/// Header size: 4 (length) + 4 (checksum) + 2 (kind) + 2 (handles) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Maximum payload size (64KB).
///
/// Protocol bodies are small and fixed in shape; anything larger is a bug.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Payload exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge {
        /// Actual payload size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Kind field does not name a known message.
    #[error("unknown message kind: {0}")]
    UnknownKind(u16),

    /// Received descriptors do not match the header.
    #[error("frame declares {declared} handles, received {received}")]
    HandleMismatch {
        /// Count from the header.
        declared: u16,
        /// Count delivered as ancillary data.
        received: u16,
    },
}

/// Frame header for wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including header.
    pub length: u32,
    /// CRC32C checksum of (kind + handles + payload).
    pub checksum: u32,
    /// Message kind discriminant.
    pub kind: u16,
    /// Number of attached descriptors.
    pub handles: u16,
}

impl FrameHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..10].copy_from_slice(&self.kind.to_le_bytes());
        buf[10..12].copy_from_slice(&self.handles.to_le_bytes());
    }

    /// Deserialize header from buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            kind: u16::from_le_bytes([buf[8], buf[9]]),
            handles: u16::from_le_bytes([buf[10], buf[11]]),
        })
    }
}

fn compute_checksum(kind: u16, handles: u16, payload: &[u8]) -> u32 {
    let mut data = Vec::with_capacity(4 + payload.len());
    data.extend_from_slice(&kind.to_le_bytes());
    data.extend_from_slice(&handles.to_le_bytes());
    data.extend_from_slice(payload);
    crc32c::crc32c(&data)
}

/// Serialize a frame.
///
/// # Errors
///
/// Returns `FrameTooLarge` if payload exceeds MAX_PAYLOAD_SIZE.
///
/// # Examples
///
/// ```
/// use shared_listen::wire::{serialize_frame, deserialize_frame};
///
/// let frame = serialize_frame(2, 1, b"body").expect("serialize");
/// let (kind, handles, payload) = deserialize_frame(&frame).expect("deserialize");
/// assert_eq!((kind, handles), (2, 1));
/// assert_eq!(payload, b"body");
/// ```
pub fn serialize_frame(kind: u16, handles: u16, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let mut data = vec![0u8; total_length];

    let header = FrameHeader {
        length: total_length as u32,
        checksum: compute_checksum(kind, handles, payload),
        kind,
        handles,
    };

    header.serialize_into(&mut data[..HEADER_SIZE]);
    data[HEADER_SIZE..].copy_from_slice(payload);

    Ok(data)
}

/// Deserialize one complete frame, validating length and checksum.
///
/// A datagram carries exactly one frame, so trailing bytes are an error.
pub fn deserialize_frame(data: &[u8]) -> Result<(u16, u16, Vec<u8>), WireError> {
    let header = FrameHeader::deserialize(data)?;

    if header.length < HEADER_SIZE as u32 || header.length as usize != data.len() {
        if (header.length as usize) > data.len() {
            return Err(WireError::InsufficientData {
                needed: header.length as usize,
                have: data.len(),
            });
        }
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }

    let payload = &data[HEADER_SIZE..];
    let computed = compute_checksum(header.kind, header.handles, payload);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    Ok((header.kind, header.handles, payload.to_vec()))
}
