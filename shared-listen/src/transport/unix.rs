//! Unix datagram transport with descriptor passing.
//!
//! Every process binds one datagram socket at
//! [`IpcConfig::path_for`](crate::config::IpcConfig::path_for). A message is
//! one datagram holding one [`wire`](crate::wire) frame; an attached handle
//! travels as `SCM_RIGHTS` ancillary data and arrives in the receiver as a new
//! descriptor that the receiver alone owns.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::Interest;
use tokio::net::UnixDatagram;

use super::{MessageSource, Transport};
use crate::config::IpcConfig;
use crate::error::TransportError;
use crate::handle::SocketHandle;
use crate::message::{ProcessAddress, TypedMessage};
use crate::wire::WireError;

const FD_SIZE: usize = mem::size_of::<RawFd>();

#[cfg(target_os = "linux")]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(target_os = "linux"))]
const RECV_FLAGS: libc::c_int = 0;

fn control_space() -> usize {
    unsafe { libc::CMSG_SPACE(FD_SIZE as libc::c_uint) as usize }
}

/// Send one datagram, attaching `fd` as `SCM_RIGHTS` when given.
fn send_with_fd(socket: RawFd, payload: &[u8], fd: Option<RawFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };
    // u64 storage keeps the control buffer aligned for cmsghdr.
    let space = control_space();
    let mut control = vec![0u64; space.div_ceil(8)];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = fd {
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(FD_SIZE as libc::c_uint) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd);
        }
    }

    let sent = unsafe { libc::sendmsg(socket, &msg, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

struct Received {
    len: usize,
    fd: Option<OwnedFd>,
    truncated: bool,
}

/// Receive one datagram and at most one descriptor.
///
/// Extra descriptors are wrapped and closed immediately so they never leak.
fn recv_with_fd(socket: RawFd, buf: &mut [u8]) -> io::Result<Received> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let space = control_space();
    let mut control = vec![0u64; space.div_ceil(8)];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let received = unsafe { libc::recvmsg(socket, &mut msg, RECV_FLAGS) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut fd = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data_len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..data_len / FD_SIZE {
                    let owned = OwnedFd::from_raw_fd(std::ptr::read_unaligned(data.add(i)));
                    if fd.is_none() {
                        fd = Some(owned);
                    } else {
                        tracing::warn!("closing extra descriptor {:?} in datagram", owned);
                    }
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "ancillary data truncated",
        ));
    }

    Ok(Received {
        len: received as usize,
        fd,
        truncated: msg.msg_flags & libc::MSG_TRUNC != 0,
    })
}

/// Sends messages to the endpoints of other processes.
///
/// Keeps one connected, unbound, non-blocking datagram socket per
/// destination. A peer whose receive queue is full fails that one message
/// with [`TransportError::Congested`]; the caller is never blocked.
pub struct UnixTransport {
    config: IpcConfig,
    sockets: RefCell<HashMap<ProcessAddress, StdUnixDatagram>>,
}

impl UnixTransport {
    /// Create a transport for endpoints described by `config`.
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            sockets: RefCell::new(HashMap::new()),
        }
    }

    fn connect(&self, destination: &ProcessAddress) -> Result<StdUnixDatagram, TransportError> {
        let socket = StdUnixDatagram::unbound()?;
        socket.set_nonblocking(true)?;
        let path = self.config.path_for(destination);
        socket.connect(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                TransportError::UnknownDestination(*destination)
            }
            _ => TransportError::Io(e),
        })?;
        Ok(socket)
    }
}

impl Transport for UnixTransport {
    fn send(&self, destination: &ProcessAddress, message: TypedMessage) -> Result<(), TransportError> {
        let frame = message.to_frame()?;
        if frame.len() > self.config.max_frame_size {
            return Err(WireError::FrameTooLarge { size: frame.len() }.into());
        }

        let mut sockets = self.sockets.borrow_mut();
        let socket = match sockets.entry(*destination) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.connect(destination)?),
        };

        let fd = message.handle.as_ref().map(|handle| handle.as_raw_fd());
        match send_with_fd(socket.as_raw_fd(), &frame, fd) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!(
                    "UnixTransport: {} queue full, dropping {}",
                    destination,
                    message.kind
                );
                return Err(TransportError::Congested(*destination));
            }
            Err(e) => {
                // The peer may have restarted at the same path; reconnect next time.
                sockets.remove(destination);
                return Err(e.into());
            }
        }

        tracing::trace!(
            "UnixTransport: sent {} ({} bytes, handle={}) to {}",
            message.kind,
            frame.len(),
            fd.is_some(),
            destination
        );
        Ok(())
    }
}

/// Bound inbound socket of one process.
///
/// The socket file is removed when the endpoint is dropped.
pub struct UnixEndpoint {
    socket: UnixDatagram,
    path: PathBuf,
    max_frame_size: usize,
}

impl UnixEndpoint {
    /// Bind the endpoint for `address`, replacing a stale socket file.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: &IpcConfig, address: ProcessAddress) -> io::Result<Self> {
        let path = config.path_for(&address);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("removed stale endpoint {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let socket = UnixDatagram::bind(&path)?;
        tracing::debug!("{} listening on {}", address, path.display());
        Ok(Self {
            socket,
            path,
            max_frame_size: config.max_frame_size,
        })
    }

    /// Filesystem path of the endpoint.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait(?Send)]
impl MessageSource for UnixEndpoint {
    async fn recv(&self) -> Result<Option<TypedMessage>, TransportError> {
        let mut buf = vec![0u8; self.max_frame_size];
        loop {
            self.socket.readable().await?;
            let result = self.socket.try_io(Interest::READABLE, || {
                recv_with_fd(self.socket.as_raw_fd(), &mut buf)
            });
            match result {
                Ok(received) => {
                    let handle = received.fd.map(SocketHandle::new);
                    if received.truncated {
                        return Err(WireError::FrameTooLarge { size: received.len }.into());
                    }
                    let message = TypedMessage::from_frame(&buf[..received.len], handle)?;
                    return Ok(Some(message));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
