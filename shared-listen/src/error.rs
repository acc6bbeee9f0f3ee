//! Error types for the shared listening socket protocol.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;
use crate::message::{MapId, MessageKind, ProcessAddress};
use crate::wire::WireError;

/// Violations of the request/response protocol.
///
/// These indicate a transport or logic bug in the local process. The
/// dispatch loops stop on them instead of guessing how to continue.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A response referenced an id this process never allocated or already resolved.
    #[error("unknown correlation id {0}")]
    UnknownCorrelationId(MapId),

    /// A successful response arrived without a socket handle attached.
    #[error("response for {0} reports success but carries no handle")]
    MissingHandle(MapId),

    /// A message of the wrong kind was handed to an unpacker.
    #[error("expected {expected} message, got {actual}")]
    UnexpectedMessage {
        /// Kind the unpacker handles.
        expected: MessageKind,
        /// Kind that was received.
        actual: MessageKind,
    },
}

/// Errors raised by message transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint is registered for the destination.
    #[error("no endpoint for {0}")]
    UnknownDestination(ProcessAddress),

    /// The destination's receive queue is full; the message was dropped.
    #[error("{0} is not draining its queue")]
    Congested(ProcessAddress),

    /// The endpoint has been closed.
    #[error("transport closed")]
    Closed,

    /// Socket level failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received bytes did not form a valid frame.
    #[error("malformed frame: {0}")]
    Wire(#[from] WireError),
}

impl TransportError {
    /// OS error code to report through a listen continuation.
    pub fn errno(&self) -> i32 {
        match self {
            TransportError::Io(e) => errno_of(e),
            TransportError::UnknownDestination(_) => libc::EHOSTUNREACH,
            TransportError::Congested(_) => libc::EAGAIN,
            TransportError::Closed => libc::EPIPE,
            TransportError::Wire(_) => libc::EPROTO,
        }
    }
}

/// Top-level error for joining and serving shared listeners.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Fatal protocol violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The coordinator could not open the socket.
    #[error("open failed: {}", os_error(.0))]
    Open(i32),

    /// No response arrived in time.
    #[error("join request {0} timed out")]
    Timeout(MapId),

    /// Message could not be delivered or received.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ListenError {
    /// Whether the error must terminate the process's dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ListenError::Protocol(_))
    }
}

fn os_error(code: &i32) -> io::Error {
    io::Error::from_raw_os_error(*code)
}

/// Extract the OS error code from an I/O error, falling back to `EIO`.
pub fn errno_of(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}
