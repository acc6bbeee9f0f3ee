//! Finalizing a transferred handle in the worker process.

use std::io;

use socket2::SockRef;

use crate::connection::{AddrInfo, Connection};
use crate::key::{FdNote, OpenFlags};

/// Turns a freshly received handle into a usable local connection.
///
/// Called by the requestor only for successful responses, before the
/// continuation runs. An error is reported to the caller like an open
/// failure and the handle is closed.
pub trait Importer {
    /// Populate OS-level details of `conn` from its handle.
    fn import_opened(&self, conn: &mut Connection, note: FdNote, info: &AddrInfo) -> io::Result<()>;
}

/// Importer that queries the socket itself.
///
/// The received descriptor is close-on-exec whatever the coordinator's copy
/// was, so `NOCLOEXEC` is applied again here, along with `NONBLOCKING`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemImporter;

impl Importer for SystemImporter {
    fn import_opened(&self, conn: &mut Connection, note: FdNote, info: &AddrInfo) -> io::Result<()> {
        let handle = conn
            .handle()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;

        let actual = SockRef::from(handle).r#type()?;
        if actual != socket2::Type::from(info.sock_type) {
            return Err(io::Error::from_raw_os_error(libc::EPROTOTYPE));
        }

        handle.set_nonblocking(conn.flags.contains(OpenFlags::NONBLOCKING))?;
        handle.set_cloexec(!conn.flags.contains(OpenFlags::NOCLOEXEC))?;
        conn.local = handle.local_addr()?;
        conn.note = note;

        tracing::debug!("imported {} (requested {})", conn, info.addr);
        Ok(())
    }
}
