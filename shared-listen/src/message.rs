//! Protocol messages exchanged between workers and the coordinator.
//!
//! # Flow
//!
//! ```text
//!   worker (kid N)                              coordinator
//!   ──────────────                              ───────────
//!   JoinRequest { params, requestor, map_id } ──►
//!                                               resolve/open socket
//!                                           ◄── JoinResponse { errno, map_id } + handle
//! ```
//!
//! Both travel as a [`TypedMessage`]: a kind, a codec-encoded body, and at
//! most one attached socket handle. A response attaches a handle exactly
//! when its `errno` is zero.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::MessageCodec;
use crate::error::{ListenError, ProtocolError};
use crate::handle::SocketHandle;
use crate::key::ListenParams;
use crate::wire::{self, WireError};

/// Identifier of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KidId(pub u32);

impl fmt::Display for KidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kid{}", self.0)
    }
}

/// Correlation id tying one outstanding join request to its response.
///
/// Unique only among the requests a single process has in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapId(pub u32);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapId={}", self.0)
    }
}

/// Named endpoint a message can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessAddress {
    /// The single coordinator process.
    Coordinator,
    /// A worker process.
    Kid(KidId),
}

impl fmt::Display for ProcessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessAddress::Coordinator => write!(f, "coordinator"),
            ProcessAddress::Kid(kid) => write!(f, "{}", kid),
        }
    }
}

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Worker asks for a listening socket.
    SharedListenRequest = 1,
    /// Coordinator answers with a handle or an error code.
    SharedListenResponse = 2,
}

impl MessageKind {
    /// Wire discriminant value.
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse wire discriminant; `None` for unknown kinds.
    pub const fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::SharedListenRequest),
            2 => Some(Self::SharedListenResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::SharedListenRequest => write!(f, "SharedListenRequest"),
            MessageKind::SharedListenResponse => write!(f, "SharedListenResponse"),
        }
    }
}

/// Transport unit: typed body plus at most one socket handle.
#[derive(Debug)]
pub struct TypedMessage {
    /// What the payload contains.
    pub kind: MessageKind,
    /// Codec-encoded body.
    pub payload: Vec<u8>,
    /// Attached handle, sent as ancillary data by descriptor-passing transports.
    pub handle: Option<SocketHandle>,
}

impl TypedMessage {
    /// Build a message without a handle.
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            handle: None,
        }
    }

    /// Attach a handle.
    pub fn with_handle(mut self, handle: SocketHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Encode the kind and payload as a wire frame.
    ///
    /// The handle is not part of the bytes; the caller sends it alongside.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let handles = u16::from(self.handle.is_some());
        wire::serialize_frame(self.kind.to_u16(), handles, &self.payload)
    }

    /// Rebuild a message from a received frame and the descriptor that came with it.
    ///
    /// A received handle is dropped (closed) if decoding fails.
    pub fn from_frame(data: &[u8], handle: Option<SocketHandle>) -> Result<Self, WireError> {
        let (kind, declared, payload) = wire::deserialize_frame(data)?;
        let kind = MessageKind::from_u16(kind).ok_or(WireError::UnknownKind(kind))?;
        let received = u16::from(handle.is_some());
        if declared != received {
            return Err(WireError::HandleMismatch { declared, received });
        }
        Ok(Self {
            kind,
            payload,
            handle,
        })
    }

    fn expect_kind(&self, expected: MessageKind) -> Result<(), ProtocolError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedMessage {
                expected,
                actual: self.kind,
            })
        }
    }
}

/// A worker's request for a listening socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Process that expects the response.
    pub requestor_id: KidId,
    /// Full request parameters.
    pub params: ListenParams,
    /// Correlation id allocated by the requestor.
    pub map_id: MapId,
}

impl JoinRequest {
    /// Encode into a transport message.
    pub fn pack<C: MessageCodec>(&self, codec: &C) -> Result<TypedMessage, ListenError> {
        let payload = codec.encode(self)?;
        Ok(TypedMessage::new(MessageKind::SharedListenRequest, payload))
    }

    /// Decode from a transport message.
    ///
    /// Requests never carry a handle; a stray one is closed.
    pub fn unpack<C: MessageCodec>(message: TypedMessage, codec: &C) -> Result<Self, ListenError> {
        message.expect_kind(MessageKind::SharedListenRequest)?;
        Ok(codec.decode(&message.payload)?)
    }
}

#[derive(Serialize, Deserialize)]
struct ResponseBody {
    errno: i32,
    map_id: MapId,
}

/// Coordinator's answer to one [`JoinRequest`].
#[derive(Debug)]
pub struct JoinResponse {
    /// Transferred handle; present iff `errno` is zero.
    pub handle: Option<SocketHandle>,
    /// OS error code, zero on success.
    pub errno: i32,
    /// Correlation id echoed from the request.
    pub map_id: MapId,
}

impl JoinResponse {
    /// Successful response carrying a transferred handle.
    pub fn success(handle: SocketHandle, map_id: MapId) -> Self {
        Self {
            handle: Some(handle),
            errno: 0,
            map_id,
        }
    }

    /// Failed response; no handle is attached.
    pub fn failure(errno: i32, map_id: MapId) -> Self {
        Self {
            handle: None,
            errno,
            map_id,
        }
    }

    /// Encode into a transport message.
    ///
    /// The handle is attached only when `errno` is zero; otherwise it is closed here.
    pub fn pack<C: MessageCodec>(self, codec: &C) -> Result<TypedMessage, ListenError> {
        let body = ResponseBody {
            errno: self.errno,
            map_id: self.map_id,
        };
        let message = TypedMessage::new(MessageKind::SharedListenResponse, codec.encode(&body)?);
        Ok(match (self.errno, self.handle) {
            (0, Some(handle)) => message.with_handle(handle),
            (0, None) => return Err(ProtocolError::MissingHandle(self.map_id).into()),
            (_, _) => message,
        })
    }

    /// Decode from a transport message.
    ///
    /// # Errors
    ///
    /// `ProtocolError::MissingHandle` when a successful response has no handle.
    /// A handle attached to a failed response is closed and ignored.
    pub fn unpack<C: MessageCodec>(message: TypedMessage, codec: &C) -> Result<Self, ListenError> {
        message.expect_kind(MessageKind::SharedListenResponse)?;
        let body: ResponseBody = codec.decode(&message.payload)?;
        let handle = match (body.errno, message.handle) {
            (0, Some(handle)) => Some(handle),
            (0, None) => return Err(ProtocolError::MissingHandle(body.map_id).into()),
            (errno, Some(stray)) => {
                tracing::debug!(
                    "dropping {:?} attached to failed response errno={} {}",
                    stray,
                    errno,
                    body.map_id
                );
                None
            }
            (_, None) => None,
        };
        Ok(Self {
            handle,
            errno: body.errno,
            map_id: body.map_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::key::{FdNote, OpenFlags};

    fn listener_handle() -> SocketHandle {
        SocketHandle::from(std::net::TcpListener::bind("127.0.0.1:0").expect("tcp bind"))
    }

    #[test]
    fn test_request_keeps_all_params() {
        let request = JoinRequest {
            requestor_id: KidId(3),
            params: ListenParams::tcp("0.0.0.0:3128".parse().expect("addr"))
                .with_flags(OpenFlags::REUSEADDR)
                .with_note(FdNote::HttpSocket),
            map_id: MapId(5),
        };

        let message = request.pack(&JsonCodec).expect("pack");
        assert_eq!(message.kind, MessageKind::SharedListenRequest);
        assert!(message.handle.is_none());

        let decoded = JoinRequest::unpack(message, &JsonCodec).expect("unpack");
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_success_response_attaches_handle() {
        let response = JoinResponse::success(listener_handle(), MapId(1));
        let message = response.pack(&JsonCodec).expect("pack");
        assert!(message.handle.is_some());

        let decoded = JoinResponse::unpack(message, &JsonCodec).expect("unpack");
        assert_eq!(decoded.errno, 0);
        assert_eq!(decoded.map_id, MapId(1));
        assert!(decoded.handle.is_some());
    }

    #[test]
    fn test_failure_response_has_no_handle() {
        let message = JoinResponse::failure(libc::EADDRINUSE, MapId(2))
            .pack(&JsonCodec)
            .expect("pack");
        assert!(message.handle.is_none());

        let decoded = JoinResponse::unpack(message, &JsonCodec).expect("unpack");
        assert_eq!(decoded.errno, libc::EADDRINUSE);
        assert!(decoded.handle.is_none());
    }

    #[test]
    fn test_handle_on_failed_response_is_discarded() {
        let body = JsonCodec
            .encode(&ResponseBody {
                errno: libc::EACCES,
                map_id: MapId(4),
            })
            .expect("encode");
        let message = TypedMessage::new(MessageKind::SharedListenResponse, body)
            .with_handle(listener_handle());

        let decoded = JoinResponse::unpack(message, &JsonCodec).expect("unpack");
        assert_eq!(decoded.errno, libc::EACCES);
        assert!(decoded.handle.is_none());
    }

    #[test]
    fn test_success_without_handle_is_protocol_error() {
        let body = JsonCodec
            .encode(&ResponseBody {
                errno: 0,
                map_id: MapId(6),
            })
            .expect("encode");
        let message = TypedMessage::new(MessageKind::SharedListenResponse, body);

        let result = JoinResponse::unpack(message, &JsonCodec);
        assert!(matches!(
            result,
            Err(ListenError::Protocol(ProtocolError::MissingHandle(MapId(6))))
        ));
    }

    #[test]
    fn test_unpack_rejects_wrong_kind() {
        let request = JoinRequest {
            requestor_id: KidId(1),
            params: ListenParams::default(),
            map_id: MapId(0),
        };
        let message = request.pack(&JsonCodec).expect("pack");

        let result = JoinResponse::unpack(message, &JsonCodec);
        assert!(matches!(
            result,
            Err(ListenError::Protocol(ProtocolError::UnexpectedMessage { .. }))
        ));
    }

    #[test]
    fn test_frame_declares_attached_handle() {
        let message = JoinResponse::success(listener_handle(), MapId(9))
            .pack(&JsonCodec)
            .expect("pack");
        let frame = message.to_frame().expect("frame");

        let lost = TypedMessage::from_frame(&frame, None);
        assert!(matches!(
            lost,
            Err(WireError::HandleMismatch {
                declared: 1,
                received: 0
            })
        ));

        let rebuilt = TypedMessage::from_frame(&frame, Some(listener_handle())).expect("rebuild");
        assert_eq!(rebuilt.kind, MessageKind::SharedListenResponse);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let frame = wire::serialize_frame(77, 0, b"{}").expect("frame");
        let result = TypedMessage::from_frame(&frame, None);
        assert!(matches!(result, Err(WireError::UnknownKind(77))));
    }
}
