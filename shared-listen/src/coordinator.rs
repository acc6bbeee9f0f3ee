//! Coordinator side of the protocol: one socket per key, duplicated per join.
//!
//! # Architecture
//!
//! ```text
//! handle_request(request):
//!   1. key = request.params.key()
//!   2. Lookup key in SharedSocketTable
//!        absent  -> Opener::open(key, flags)
//!                     ok  -> insert (key, handle)
//!                     err -> respond errno, table unchanged
//!        present -> reuse
//!   3. Duplicate the cached handle (failure -> respond errno)
//!   4. Send JoinResponse { dup, errno, map_id } to the requestor
//! ```
//!
//! Per key the table is in one of three states: unopened, open, or a failed
//! open. A failed open is not remembered, so the next request for the key
//! tries again. `handle_request` takes `&mut self` and is awaited to
//! completion before the next request is read, so no request ever sees the
//! table mid-update.

use std::collections::BTreeMap;

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{errno_of, ListenError, TransportError};
use crate::handle::SocketHandle;
use crate::key::{ListenKey, OpenFlags};
use crate::message::{JoinRequest, JoinResponse, MessageKind, ProcessAddress, TypedMessage};
use crate::opener::Opener;
use crate::transport::{MessageSource, Transport};

/// Sockets opened by the coordinator, one per [`ListenKey`].
///
/// Handles stay here for the coordinator's lifetime; requestors only ever
/// receive duplicates.
#[derive(Debug, Default)]
pub struct SharedSocketTable {
    sockets: BTreeMap<ListenKey, SocketHandle>,
}

impl SharedSocketTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for `key`.
    pub fn get(&self, key: &ListenKey) -> Option<&SocketHandle> {
        self.sockets.get(key)
    }

    /// Cache `handle` under `key`, returning any handle it replaces.
    pub fn insert(&mut self, key: ListenKey, handle: SocketHandle) -> Option<SocketHandle> {
        self.sockets.insert(key, handle)
    }

    /// Whether a socket is cached for `key`.
    pub fn contains(&self, key: &ListenKey) -> bool {
        self.sockets.contains_key(key)
    }

    /// Number of cached sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Whether no socket has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Cached keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &ListenKey> {
        self.sockets.keys()
    }
}

/// Counters describing what the coordinator has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Join requests handled.
    pub requests: u64,
    /// Sockets newly opened.
    pub opened: u64,
    /// Requests served from an already open socket.
    pub reused: u64,
    /// Opener failures.
    pub open_failures: u64,
    /// Handle duplication failures.
    pub transfer_failures: u64,
    /// Responses the transport could not deliver.
    pub send_failures: u64,
}

/// The single process that opens and deduplicates listening sockets.
pub struct Coordinator<O, T, C = JsonCodec>
where
    O: Opener,
    T: Transport,
    C: MessageCodec,
{
    opener: O,
    transport: T,
    codec: C,
    table: SharedSocketTable,
    stats: CoordinatorStats,
}

impl<O, T> Coordinator<O, T, JsonCodec>
where
    O: Opener,
    T: Transport,
{
    /// Create a coordinator using the JSON codec.
    pub fn new(opener: O, transport: T) -> Self {
        Self::with_codec(opener, transport, JsonCodec)
    }
}

impl<O, T, C> Coordinator<O, T, C>
where
    O: Opener,
    T: Transport,
    C: MessageCodec,
{
    /// Create a coordinator with a custom payload codec.
    pub fn with_codec(opener: O, transport: T, codec: C) -> Self {
        Self {
            opener,
            transport,
            codec,
            table: SharedSocketTable::new(),
            stats: CoordinatorStats::default(),
        }
    }

    /// Sockets opened so far.
    pub fn table(&self) -> &SharedSocketTable {
        &self.table
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// The opener used for new keys.
    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Serve one join request and send the response to its requestor.
    ///
    /// Open and duplication failures are reported to the requestor, not
    /// returned here.
    ///
    /// # Errors
    ///
    /// Returns an error only if the response could not be encoded or sent.
    pub async fn handle_request(&mut self, request: JoinRequest) -> Result<(), ListenError> {
        self.stats.requests += 1;
        let requestor = ProcessAddress::Kid(request.requestor_id);
        tracing::debug!(
            "{} asks for {} {}",
            requestor,
            request.params.key(),
            request.map_id
        );

        let response = self.respond(&request).await;
        let message = response.pack(&self.codec)?;
        if let Err(e) = self.transport.send(&requestor, message) {
            self.stats.send_failures += 1;
            tracing::warn!(
                "could not answer {} for {}: {}",
                requestor,
                request.map_id,
                e
            );
            return Err(e.into());
        }
        Ok(())
    }

    async fn respond(&mut self, request: &JoinRequest) -> JoinResponse {
        let key = request.params.key();
        let shared = match self.shared_socket(&key, request.params.flags).await {
            Ok(handle) => handle,
            Err(errno) => return JoinResponse::failure(errno, request.map_id),
        };

        match shared.duplicate() {
            Ok(copy) => JoinResponse::success(copy, request.map_id),
            Err(e) => {
                self.stats.transfer_failures += 1;
                tracing::warn!("cannot duplicate {} for {}: {}", key, request.map_id, e);
                JoinResponse::failure(errno_of(&e), request.map_id)
            }
        }
    }

    async fn shared_socket(&mut self, key: &ListenKey, flags: OpenFlags) -> Result<&SocketHandle, i32> {
        if self.table.contains(key) {
            self.stats.reused += 1;
        } else {
            match self.opener.open(key, flags).await {
                Ok(handle) => {
                    self.stats.opened += 1;
                    tracing::debug!("opened shared {} as {:?}", key, handle);
                    self.table.insert(*key, handle);
                }
                Err(e) => {
                    self.stats.open_failures += 1;
                    tracing::warn!("cannot open {}: {}", key, e);
                    return Err(errno_of(&e));
                }
            }
        }
        self.table.get(key).ok_or(libc::EBADF)
    }

    /// Dispatch one inbound message.
    ///
    /// Messages other than join requests are logged and ignored.
    pub async fn receive(&mut self, message: TypedMessage) -> Result<(), ListenError> {
        match message.kind {
            MessageKind::SharedListenRequest => {
                let request = JoinRequest::unpack(message, &self.codec)?;
                self.handle_request(request).await
            }
            other => {
                tracing::warn!("coordinator ignoring {} message", other);
                Ok(())
            }
        }
    }

    /// Serve requests from `source`, one at a time, until it closes.
    ///
    /// Bad requests and undeliverable responses only affect the request
    /// concerned.
    ///
    /// # Errors
    ///
    /// Returns an error if the source itself fails.
    pub async fn run<S: MessageSource>(&mut self, source: &S) -> Result<(), ListenError> {
        loop {
            match source.recv().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.receive(message).await {
                        tracing::warn!("coordinator skipping request: {}", e);
                    }
                }
                Ok(None) => {
                    tracing::debug!("coordinator message source closed");
                    return Ok(());
                }
                Err(TransportError::Wire(e)) => {
                    tracing::warn!("coordinator skipping malformed frame: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
