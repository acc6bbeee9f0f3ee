//! Owned OS socket handles.
//!
//! A [`SocketHandle`] owns exactly one descriptor and closes it on drop.
//! Copies only happen through [`SocketHandle::duplicate`], which asks the
//! kernel for a fresh descriptor referring to the same socket. The
//! coordinator keeps its original and sends duplicates; every process closes
//! only the handles it was given.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use socket2::SockRef;

/// Exclusively owned socket descriptor.
pub struct SocketHandle {
    fd: OwnedFd,
}

impl SocketHandle {
    /// Take ownership of a descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Create an independently closable duplicate of this handle.
    pub fn duplicate(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let addr = SockRef::from(&self.fd).local_addr()?;
        addr.as_socket().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "socket is not an inet socket")
        })
    }

    /// Switch the socket between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        SockRef::from(&self.fd).set_nonblocking(nonblocking)
    }

    /// Set or clear close-on-exec on this descriptor only.
    ///
    /// Unlike non-blocking mode, close-on-exec is not shared with other
    /// duplicates of the socket.
    pub fn set_cloexec(&self, close_on_exec: bool) -> io::Result<()> {
        SockRef::from(&self.fd).set_cloexec(close_on_exec)
    }

    /// Convert into a socket2 socket for further configuration.
    pub fn into_socket(self) -> socket2::Socket {
        socket2::Socket::from(self.fd)
    }

    /// Convert into a standard TCP listener.
    pub fn into_tcp_listener(self) -> std::net::TcpListener {
        std::net::TcpListener::from(self.fd)
    }

    /// Convert into a standard UDP socket.
    pub fn into_udp_socket(self) -> std::net::UdpSocket {
        std::net::UdpSocket::from(self.fd)
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

impl AsFd for SocketHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for SocketHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for SocketHandle {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl FromRawFd for SocketHandle {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            fd: OwnedFd::from_raw_fd(fd),
        }
    }
}

impl From<OwnedFd> for SocketHandle {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<SocketHandle> for OwnedFd {
    fn from(handle: SocketHandle) -> Self {
        handle.fd
    }
}

impl From<socket2::Socket> for SocketHandle {
    fn from(socket: socket2::Socket) -> Self {
        Self::new(OwnedFd::from(socket))
    }
}

impl From<std::net::TcpListener> for SocketHandle {
    fn from(listener: std::net::TcpListener) -> Self {
        Self::new(OwnedFd::from(listener))
    }
}

impl From<std::net::UdpSocket> for SocketHandle {
    fn from(socket: std::net::UdpSocket) -> Self {
        Self::new(OwnedFd::from(socket))
    }
}
