//! Listening socket identity and request parameters.
//!
//! A worker describes the socket it wants with [`ListenParams`]. Only part of
//! that description decides which OS socket it gets: the [`ListenKey`]
//! (socket type, protocol, bind address). Flags, the diagnostic note and the
//! handler subscription ride along without affecting binding identity, so two
//! requests that differ only in those fields share one socket.

use std::cmp::Ordering;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Socket type of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SocketType {
    /// Connection oriented (`SOCK_STREAM`).
    Stream,
    /// Connectionless (`SOCK_DGRAM`).
    Datagram,
}

impl SocketType {
    /// Whether the socket needs `listen(2)` after binding.
    pub fn is_stream(self) -> bool {
        matches!(self, SocketType::Stream)
    }
}

impl From<SocketType> for socket2::Type {
    fn from(value: SocketType) -> Self {
        match value {
            SocketType::Stream => socket2::Type::STREAM,
            SocketType::Datagram => socket2::Type::DGRAM,
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketType::Stream => write!(f, "stream"),
            SocketType::Datagram => write!(f, "dgram"),
        }
    }
}

bitflags! {
    /// Options applied when the coordinator opens a socket.
    ///
    /// None of these take part in [`ListenKey`] comparison.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u32 {
        /// Put the socket in non-blocking mode.
        const NONBLOCKING = 1 << 0;
        /// Keep the descriptor open across exec.
        const NOCLOEXEC = 1 << 1;
        /// Set `SO_REUSEADDR` before binding.
        const REUSEADDR = 1 << 2;
        /// Bind even when the address is a wildcard.
        const DOBIND = 1 << 3;
        /// Accept traffic for non-local addresses (`IP_TRANSPARENT`).
        const TRANSPARENT = 1 << 4;
        /// Connections arrive through NAT interception.
        const INTERCEPTION = 1 << 5;
    }
}

impl Serialize for OpenFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OpenFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(OpenFlags::from_bits_truncate(bits))
    }
}

/// Diagnostic label attached to a descriptor for debugging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FdNote {
    /// No label.
    #[default]
    None,
    /// HTTP listening socket.
    HttpSocket,
    /// HTTPS listening socket.
    HttpsSocket,
    /// FTP listening socket.
    FtpSocket,
    /// Outgoing ICP socket.
    IcpSocket,
    /// Incoming ICP socket.
    InIcpSocket,
    /// Incoming SNMP socket.
    InSnmpSocket,
    /// Outgoing SNMP socket.
    OutSnmpSocket,
    /// HTCP socket.
    HtcpSocket,
}

impl fmt::Display for FdNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FdNote::None => "None",
            FdNote::HttpSocket => "HTTP Socket",
            FdNote::HttpsSocket => "HTTPS Socket",
            FdNote::FtpSocket => "FTP Socket",
            FdNote::IcpSocket => "ICP Socket",
            FdNote::InIcpSocket => "Incoming ICP socket",
            FdNote::InSnmpSocket => "Incoming SNMP Socket",
            FdNote::OutSnmpSocket => "Outgoing SNMP Socket",
            FdNote::HtcpSocket => "HTCP Socket",
        };
        f.write_str(label)
    }
}

/// Which accept handler should receive traffic from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HandlerKind {
    /// No handler registered yet.
    #[default]
    None,
    /// Accepts HTTP client connections.
    HttpAccept,
    /// Accepts TLS-wrapped client connections.
    HttpsAccept,
    /// Reads ICP datagrams.
    IcpReceive,
    /// Reads HTCP datagrams.
    HtcpReceive,
    /// Reads SNMP datagrams.
    SnmpReceive,
}

/// Handler subscription carried through a join request.
///
/// The token is only meaningful inside the requesting process; the
/// coordinator never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Subscription {
    /// Handler family.
    pub kind: HandlerKind,
    /// Requestor-local handler token.
    pub token: u64,
}

impl Subscription {
    /// Create a subscription for the given handler.
    pub fn new(kind: HandlerKind, token: u64) -> Self {
        Self { kind, token }
    }
}

/// The bind-relevant part of a listen request.
///
/// Ordering looks at the socket type, then the protocol, then the whole bind
/// address (family, IP, port and IPv6 scope), which makes it usable as a map
/// key on the coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListenKey {
    /// Stream or datagram.
    pub sock_type: SocketType,
    /// Transport protocol number; 0 selects the default for the type.
    pub protocol: i32,
    /// Address to bind.
    pub addr: SocketAddr,
}

impl ListenKey {
    /// Create a key.
    pub fn new(sock_type: SocketType, protocol: i32, addr: SocketAddr) -> Self {
        Self {
            sock_type,
            protocol,
            addr,
        }
    }

    /// Socket domain (address family) implied by the bind address.
    pub fn domain(&self) -> socket2::Domain {
        socket2::Domain::for_address(self.addr)
    }
}

impl Ord for ListenKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sock_type
            .cmp(&other.sock_type)
            .then_with(|| self.protocol.cmp(&other.protocol))
            .then_with(|| self.addr.cmp(&other.addr))
    }
}

impl PartialOrd for ListenKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ListenKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ListenKey {}

impl fmt::Display for ListenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.sock_type, self.protocol, self.addr)
    }
}

/// Full parameters of one listen request.
///
/// Owned by the requesting worker for the lifetime of the request. The
/// coordinator only derives a [`ListenKey`] and the open flags from it; the
/// rest comes back to the caller from the worker's own pending record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenParams {
    /// Stream or datagram.
    pub sock_type: SocketType,
    /// Transport protocol number.
    pub protocol: i32,
    /// Address to bind.
    pub addr: SocketAddr,
    /// Socket options used when opening.
    pub flags: OpenFlags,
    /// Diagnostic label.
    pub fd_note: FdNote,
    /// Accept handler to wire the socket to once it arrives.
    pub subscription: Subscription,
}

impl Default for ListenParams {
    fn default() -> Self {
        Self {
            sock_type: SocketType::Stream,
            protocol: 0,
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            flags: OpenFlags::empty(),
            fd_note: FdNote::None,
            subscription: Subscription::default(),
        }
    }
}

impl ListenParams {
    /// TCP listener parameters for `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            sock_type: SocketType::Stream,
            protocol: libc::IPPROTO_TCP,
            addr,
            ..Self::default()
        }
    }

    /// UDP socket parameters for `addr`.
    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            sock_type: SocketType::Datagram,
            protocol: libc::IPPROTO_UDP,
            addr,
            ..Self::default()
        }
    }

    /// Set the open flags.
    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the diagnostic note.
    pub fn with_note(mut self, fd_note: FdNote) -> Self {
        self.fd_note = fd_note;
        self
    }

    /// Set the handler subscription.
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = subscription;
        self
    }

    /// Identity of the socket these parameters ask for.
    pub fn key(&self) -> ListenKey {
        ListenKey::new(self.sock_type, self.protocol, self.addr)
    }
}
