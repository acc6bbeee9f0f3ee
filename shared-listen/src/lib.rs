//! # shared-listen
//!
//! Shared listening sockets for multi-process network servers.
//!
//! One coordinator process binds every listening socket. Worker processes
//! ("kids") ask it for a socket instead of binding their own, and receive a
//! duplicate of the coordinator's handle. Requests that differ only in
//! cosmetic fields (flags, diagnostic note, handler subscription) map to the
//! same OS socket.
//!
//! ```text
//!   kid 1 ──JoinRequest──┐                        ┌──► opener (bind/listen)
//!   kid 2 ──JoinRequest──┼──► Coordinator ────────┤
//!   kid N ──JoinRequest──┘    SharedSocketTable   └──► dup(handle)
//!                                  │
//!   kid N ◄──JoinResponse + handle─┘
//! ```
//!
//! - **Keys**: [`ListenKey`] / [`ListenParams`] with partial equality
//! - **Requestor**: [`Requestor`] correlates responses with a
//!   [`PendingRequestTable`] and resumes callbacks asynchronously
//! - **Coordinator**: [`Coordinator`] deduplicates through a
//!   [`SharedSocketTable`] and retries failed opens
//! - **Transports**: [`LocalNetwork`] in-process, [`UnixTransport`] across
//!   processes with `SCM_RIGHTS`
//!
//! Both roles run on a single-threaded Tokio runtime inside a
//! [`tokio::task::LocalSet`].

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod importer;
pub mod key;
pub mod message;
pub mod opener;
pub mod pending;
pub mod providers;
pub mod requestor;
pub mod transport;
pub mod wire;

// Codec exports
pub use codec::{CodecError, JsonCodec, MessageCodec};

// Configuration exports
pub use config::{IpcConfig, SharedListenConfig};

// Error exports
pub use error::{errno_of, ListenError, ProtocolError, TransportError};
pub use wire::WireError;

// Socket and key exports
pub use connection::{AddrInfo, Connection};
pub use handle::SocketHandle;
pub use key::{FdNote, HandlerKind, ListenKey, ListenParams, OpenFlags, SocketType, Subscription};

// Protocol exports
pub use message::{JoinRequest, JoinResponse, KidId, MapId, MessageKind, ProcessAddress, TypedMessage};
pub use pending::{PendingRequest, PendingRequestTable, Resolved};

// Role exports
pub use coordinator::{Coordinator, CoordinatorStats, SharedSocketTable};
pub use requestor::{reply_channel, ListenCallback, Requestor, StartListening};

// Collaborator exports
pub use importer::{Importer, SystemImporter};
pub use opener::{Opener, SystemOpener};
pub use providers::{
    Providers, TaskProvider, TimeProvider, TokioProviders, TokioTaskProvider, TokioTimeProvider,
};
pub use transport::{LocalInbox, LocalNetwork, MessageSource, Transport, UnixEndpoint, UnixTransport};
