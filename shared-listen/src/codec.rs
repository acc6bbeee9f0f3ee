//! Payload serialization for protocol messages.
//!
//! Request and response bodies travel as the payload of a
//! [`TypedMessage`](crate::message::TypedMessage). The [`MessageCodec`] trait
//! decides how those bodies become bytes; [`JsonCodec`] is the default and is
//! what both roles use unless told otherwise.
//!
//! # Example
//!
//! ```rust
//! use shared_listen::{JsonCodec, MessageCodec};
//! use shared_listen::message::MapId;
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&MapId(7)).unwrap();
//! let decoded: MapId = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, MapId(7));
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug)]
pub enum CodecError {
    /// Failed to encode a message body to bytes.
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message body.
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "encode error: {}", e),
            CodecError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CodecError::Encode(e) => Some(e.as_ref()),
            CodecError::Decode(e) => Some(e.as_ref()),
        }
    }
}

/// Pluggable serialization format for message bodies.
///
/// Both sides of a channel must agree on the codec; the frame does not
/// record which one produced the payload.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable body to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
