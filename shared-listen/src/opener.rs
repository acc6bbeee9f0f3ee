//! Creating and binding listening sockets on the coordinator.

use std::io;

use async_trait::async_trait;
use socket2::{Protocol, Socket};

use crate::config::SharedListenConfig;
use crate::handle::SocketHandle;
use crate::key::{ListenKey, OpenFlags};

/// Opens the OS socket for a key the coordinator has not seen yet.
///
/// Errors carry OS error codes; the coordinator forwards them to the
/// requesting worker unchanged.
#[async_trait(?Send)]
pub trait Opener {
    /// Create, configure, bind and (for streams) listen.
    async fn open(&self, key: &ListenKey, flags: OpenFlags) -> io::Result<SocketHandle>;
}

/// Opener backed by real sockets.
#[derive(Debug, Clone)]
pub struct SystemOpener {
    backlog: i32,
}

impl Default for SystemOpener {
    fn default() -> Self {
        Self::new(&SharedListenConfig::default())
    }
}

impl SystemOpener {
    /// Create an opener using the configured listen backlog.
    pub fn new(config: &SharedListenConfig) -> Self {
        Self {
            backlog: config.listen_backlog,
        }
    }

    fn open_now(&self, key: &ListenKey, flags: OpenFlags) -> io::Result<SocketHandle> {
        let protocol = (key.protocol != 0).then(|| Protocol::from(key.protocol));
        let socket = Socket::new(key.domain(), key.sock_type.into(), protocol)?;

        if flags.contains(OpenFlags::REUSEADDR) {
            socket.set_reuse_address(true)?;
        }
        if flags.contains(OpenFlags::TRANSPARENT) {
            set_transparent(&socket, key.domain())?;
        }
        if flags.contains(OpenFlags::NOCLOEXEC) {
            socket.set_cloexec(false)?;
        }
        if flags.contains(OpenFlags::NONBLOCKING) {
            socket.set_nonblocking(true)?;
        }

        socket.bind(&key.addr.into())?;
        if key.sock_type.is_stream() {
            socket.listen(self.backlog)?;
        }

        tracing::debug!("opened {} ({})", key, flags_label(flags));
        Ok(SocketHandle::from(socket))
    }
}

#[async_trait(?Send)]
impl Opener for SystemOpener {
    async fn open(&self, key: &ListenKey, flags: OpenFlags) -> io::Result<SocketHandle> {
        self.open_now(key, flags)
    }
}

fn flags_label(flags: OpenFlags) -> String {
    if flags.is_empty() {
        "no flags".to_string()
    } else {
        format!("{:?}", flags)
    }
}

/// Allow binding to non-local addresses for interception.
#[cfg(target_os = "linux")]
fn set_transparent(socket: &Socket, domain: socket2::Domain) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let (level, name) = if domain == socket2::Domain::IPV6 {
        (libc::SOL_IPV6, libc::IPV6_TRANSPARENT)
    } else {
        (libc::SOL_IP, libc::IP_TRANSPARENT)
    };
    let optval: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of_val(&optval) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_transparent(_socket: &Socket, _domain: socket2::Domain) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::ENOPROTOOPT))
}
