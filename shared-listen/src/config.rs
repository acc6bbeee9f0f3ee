//! Configuration for the shared listening socket roles and the IPC transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::message::ProcessAddress;
use crate::wire;

/// Requestor and opener behaviour.
#[derive(Clone, Debug)]
pub struct SharedListenConfig {
    /// How long a join may wait for its response before the continuation is
    /// failed with `ETIMEDOUT`.
    ///
    /// `None` waits forever.
    pub join_timeout: Option<Duration>,

    /// How long a timed-out join keeps its id reserved for a late response.
    ///
    /// `None` keeps the id until the response arrives, however late.
    pub abandon_grace: Option<Duration>,

    /// Backlog passed to `listen(2)` for stream sockets.
    pub listen_backlog: i32,
}

impl Default for SharedListenConfig {
    fn default() -> Self {
        Self {
            join_timeout: Some(Duration::from_secs(30)),
            abandon_grace: Some(Duration::from_secs(300)),
            listen_backlog: 1024,
        }
    }
}

impl SharedListenConfig {
    /// Use a custom join timeout.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    /// Never time out pending joins.
    pub fn without_join_timeout(mut self) -> Self {
        self.join_timeout = None;
        self
    }

    /// Release timed-out ids `grace` after their timeout.
    pub fn with_abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = Some(grace);
        self
    }

    /// Keep timed-out ids reserved until their late response arrives.
    pub fn without_abandon_grace(mut self) -> Self {
        self.abandon_grace = None;
        self
    }

    /// Use a custom listen backlog.
    pub fn with_listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }
}

/// Where the Unix datagram endpoints live and how large a datagram may be.
#[derive(Clone, Debug)]
pub struct IpcConfig {
    /// Directory holding one socket file per process.
    pub socket_dir: PathBuf,

    /// Prefix shared by all endpoint file names of one deployment.
    pub prefix: String,

    /// Largest datagram accepted or sent, header included.
    pub max_frame_size: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            prefix: "shared-listen".to_string(),
            max_frame_size: wire::HEADER_SIZE + wire::MAX_PAYLOAD_SIZE,
        }
    }
}

impl IpcConfig {
    /// Endpoints under `socket_dir` with the default prefix.
    pub fn new(socket_dir: impl AsRef<Path>) -> Self {
        Self {
            socket_dir: socket_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Use a custom file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Use a custom datagram size limit.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Socket path of `address`.
    pub fn path_for(&self, address: &ProcessAddress) -> PathBuf {
        let name = match address {
            ProcessAddress::Coordinator => format!("{}-coordinator.ipc", self.prefix),
            ProcessAddress::Kid(kid) => format!("{}-kid-{}.ipc", self.prefix, kid.0),
        };
        self.socket_dir.join(name)
    }
}
