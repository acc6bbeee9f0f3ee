//! Local connection value produced by a successful join.

use std::fmt;
use std::net::SocketAddr;

use crate::handle::SocketHandle;
use crate::key::{FdNote, ListenParams, OpenFlags, SocketType};

/// Address information handed to the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrInfo {
    /// Socket domain derived from the address.
    pub domain: socket2::Domain,
    /// Stream or datagram.
    pub sock_type: SocketType,
    /// Transport protocol number.
    pub protocol: i32,
    /// Requested bind address.
    pub addr: SocketAddr,
}

impl From<&ListenParams> for AddrInfo {
    fn from(params: &ListenParams) -> Self {
        Self {
            domain: socket2::Domain::for_address(params.addr),
            sock_type: params.sock_type,
            protocol: params.protocol,
            addr: params.addr,
        }
    }
}

/// A listening socket as seen by the worker that joined it.
///
/// The handle is `None` when the join failed; there is no sentinel
/// descriptor value.
pub struct Connection {
    handle: Option<SocketHandle>,
    /// Local address, from the request until the importer refreshes it.
    pub local: SocketAddr,
    /// Flags the socket was requested with.
    pub flags: OpenFlags,
    /// Diagnostic label.
    pub note: FdNote,
    /// Stream or datagram.
    pub sock_type: SocketType,
    /// Transport protocol number.
    pub protocol: i32,
}

impl Connection {
    /// Describe a transferred handle using the parameters kept by the requestor.
    pub fn from_params(handle: Option<SocketHandle>, params: &ListenParams) -> Self {
        Self {
            handle,
            local: params.addr,
            flags: params.flags,
            note: params.fd_note,
            sock_type: params.sock_type,
            protocol: params.protocol,
        }
    }

    /// Whether a usable handle is attached.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Borrow the handle.
    pub fn handle(&self) -> Option<&SocketHandle> {
        self.handle.as_ref()
    }

    /// Take the handle out, leaving the connection closed.
    pub fn take_handle(&mut self) -> Option<SocketHandle> {
        self.handle.take()
    }

    /// Close the handle if one is attached.
    pub fn close(&mut self) {
        self.handle = None;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("local", &self.local)
            .field("flags", &self.flags)
            .field("note", &self.note)
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            Some(handle) => write!(f, "{} local={} FD {:?}", self.note, self.local, handle),
            None => write!(f, "{} local={} closed", self.note, self.local),
        }
    }
}
