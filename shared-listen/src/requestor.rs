//! Worker side of the protocol: asking for shared listening sockets.
//!
//! # Architecture
//!
//! ```text
//! join(params, callback):
//!   1. Allocate a MapId for (params, callback) in the pending table
//!   2. Send JoinRequest { kid, params, map_id } to the coordinator
//!   3. Arm the join timeout (if configured)
//!
//! on_joined(response):
//!   4. Resolve map_id in the pending table (unknown id is fatal)
//!   5. Merge the kept params onto the transferred handle
//!   6. Import the handle (successful responses only)
//!   7. Schedule the callback as a separate local task
//!
//! timeout:
//!   6'. Abandon the entry, schedule the callback with ETIMEDOUT
//!   7'. After the grace period, release the id if no late response came
//! ```
//!
//! The callback never runs inside `join` or `on_joined`; callers always get
//! control back first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{JsonCodec, MessageCodec};
use crate::config::SharedListenConfig;
use crate::connection::{AddrInfo, Connection};
use crate::error::{errno_of, ListenError, ProtocolError, TransportError};
use crate::importer::Importer;
use crate::key::{ListenParams, Subscription};
use crate::message::{
    JoinRequest, JoinResponse, KidId, MapId, MessageKind, ProcessAddress, TypedMessage,
};
use crate::pending::{PendingRequestTable, Resolved};
use crate::providers::{Providers, TaskProvider, TimeProvider};
use crate::transport::{MessageSource, Transport};

/// Outcome handed to a join continuation.
#[derive(Debug)]
pub struct StartListening {
    /// The joined socket, open only when `errno` is zero.
    pub conn: Connection,
    /// OS error code, zero on success.
    pub errno: i32,
    /// Subscription copied from the request.
    pub subscription: Subscription,
    /// Correlation id the join was sent with.
    pub map_id: MapId,
}

impl StartListening {
    fn failed(params: &ListenParams, errno: i32, map_id: MapId) -> Self {
        Self {
            conn: Connection::from_params(None, params),
            errno,
            subscription: params.subscription,
            map_id,
        }
    }

    /// Whether the join produced a usable socket.
    pub fn is_ok(&self) -> bool {
        self.errno == 0 && self.conn.is_open()
    }

    /// The failure as an error value, if any.
    pub fn error(&self) -> Option<ListenError> {
        match self.errno {
            0 => None,
            libc::ETIMEDOUT => Some(ListenError::Timeout(self.map_id)),
            errno => Some(ListenError::Open(errno)),
        }
    }
}

/// One-shot continuation resumed with the join outcome.
pub type ListenCallback = Box<dyn FnOnce(StartListening)>;

/// A callback that forwards the outcome into a oneshot channel.
///
/// The receiver reports `RecvError` only if the requestor is dropped with
/// the request still pending.
pub fn reply_channel() -> (ListenCallback, oneshot::Receiver<StartListening>) {
    let (tx, rx) = oneshot::channel();
    let callback: ListenCallback = Box::new(move |outcome: StartListening| {
        // The caller may have stopped waiting.
        let _ = tx.send(outcome);
    });
    (callback, rx)
}

/// Per-process requestor.
///
/// Owns the pending request table. All methods take `&self`; share the
/// requestor through an `Rc` to call [`join`](Self::join) while
/// [`run`](Self::run) is dispatching responses.
pub struct Requestor<T, I, P, C = JsonCodec>
where
    T: Transport,
    I: Importer,
    P: Providers,
    C: MessageCodec,
{
    kid_id: KidId,
    transport: T,
    importer: I,
    providers: P,
    codec: C,
    config: SharedListenConfig,
    pending: Rc<RefCell<PendingRequestTable<ListenCallback>>>,
    timers: Rc<RefCell<TimerTable>>,
}

/// Timeout task per id, tagged with the allocation serial it guards.
type TimerTable = HashMap<MapId, (u64, JoinHandle<()>)>;

impl<T, I, P> Requestor<T, I, P, JsonCodec>
where
    T: Transport,
    I: Importer,
    P: Providers,
{
    /// Create a requestor for worker `kid_id` using the JSON codec.
    pub fn new(
        kid_id: KidId,
        transport: T,
        importer: I,
        providers: P,
        config: SharedListenConfig,
    ) -> Self {
        Self::with_codec(kid_id, transport, importer, providers, config, JsonCodec)
    }
}

impl<T, I, P, C> Requestor<T, I, P, C>
where
    T: Transport,
    I: Importer,
    P: Providers,
    C: MessageCodec,
{
    /// Create a requestor with a custom payload codec.
    ///
    /// The coordinator must use the same codec.
    pub fn with_codec(
        kid_id: KidId,
        transport: T,
        importer: I,
        providers: P,
        config: SharedListenConfig,
        codec: C,
    ) -> Self {
        Self {
            kid_id,
            transport,
            importer,
            providers,
            codec,
            config,
            pending: Rc::new(RefCell::new(PendingRequestTable::new())),
            timers: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Identifier this requestor puts in its requests.
    pub fn kid_id(&self) -> KidId {
        self.kid_id
    }

    /// Number of joins still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().pending_count()
    }

    /// Ask the coordinator for a listening socket matching `params`.
    ///
    /// Returns the correlation id once the request has been handed to the
    /// transport. `callback` runs later, as its own task, with the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent. The callback is
    /// still scheduled, with the transport's error code.
    pub fn join(&self, params: ListenParams, callback: ListenCallback) -> Result<MapId, ListenError> {
        let map_id = self.pending.borrow_mut().allocate(params.clone(), callback);
        let request = JoinRequest {
            requestor_id: self.kid_id,
            params,
            map_id,
        };

        if let Err(e) = self.send_request(&request) {
            let errno = match &e {
                ListenError::Transport(err) => err.errno(),
                _ => libc::EPROTO,
            };
            tracing::warn!(
                "{} join {} {} not sent: {}",
                self.kid_id,
                request.params.key(),
                map_id,
                e
            );
            let removed = self.pending.borrow_mut().remove(map_id);
            if let Some(pending) = removed {
                let outcome = StartListening::failed(&pending.params, errno, map_id);
                self.schedule(pending.callback, outcome);
            }
            return Err(e);
        }

        tracing::debug!(
            "{} sent join {} {}",
            self.kid_id,
            request.params.key(),
            map_id
        );
        if let Some(timeout) = self.config.join_timeout {
            self.arm_timeout(map_id, timeout);
        }
        Ok(map_id)
    }

    fn send_request(&self, request: &JoinRequest) -> Result<(), ListenError> {
        let message = request.pack(&self.codec)?;
        self.transport.send(&ProcessAddress::Coordinator, message)?;
        Ok(())
    }

    fn arm_timeout(&self, map_id: MapId, timeout: Duration) {
        let Some(serial) = self.pending.borrow().get(map_id).map(|p| p.serial()) else {
            return;
        };
        let pending = Rc::clone(&self.pending);
        let timers = Rc::clone(&self.timers);
        let time = self.providers.time().clone();
        let grace = self.config.abandon_grace;
        let kid_id = self.kid_id;

        let timer = self.providers.task().spawn_task("join_timeout", async move {
            time.sleep(timeout).await;
            let abandoned = pending.borrow_mut().abandon(map_id, serial);
            if let Some(request) = abandoned {
                tracing::warn!(
                    "{} join {} {} timed out after {:?}",
                    kid_id,
                    request.params.key(),
                    map_id,
                    timeout
                );
                let outcome = StartListening::failed(&request.params, libc::ETIMEDOUT, map_id);
                (request.callback)(outcome);

                if let Some(grace) = grace {
                    time.sleep(grace).await;
                    if pending.borrow_mut().forget(map_id, serial) {
                        tracing::debug!("{} released {} after {:?}", kid_id, map_id, grace);
                    }
                }
            }

            let mut timers = timers.borrow_mut();
            if matches!(timers.get(&map_id), Some((s, _)) if *s == serial) {
                timers.remove(&map_id);
            }
        });
        self.timers.borrow_mut().insert(map_id, (serial, timer));
    }

    /// Complete the join that `response` answers.
    ///
    /// # Errors
    ///
    /// A [`ProtocolError`] if the response names an id this process is not
    /// waiting on, or claims success without a handle. Both are fatal.
    pub fn on_joined(&self, response: JoinResponse) -> Result<(), ListenError> {
        let JoinResponse {
            handle,
            errno,
            map_id,
        } = response;

        if errno == 0 && handle.is_none() {
            tracing::error!("{} response {} succeeded without a handle", self.kid_id, map_id);
            return Err(ProtocolError::MissingHandle(map_id).into());
        }

        let resolved = self.pending.borrow_mut().resolve(map_id);
        let request = match resolved {
            Ok(Resolved::Pending(request)) => request,
            Ok(Resolved::Abandoned(id)) => {
                tracing::warn!("{} dropping late response for {}", self.kid_id, id);
                self.cancel_timer(map_id);
                return Ok(());
            }
            Err(e) => {
                tracing::error!("{} got response for {}: {}", self.kid_id, map_id, e);
                return Err(e.into());
            }
        };
        self.cancel_timer(map_id);

        let params = request.params;
        let handle = if errno == 0 { handle } else { None };
        let mut conn = Connection::from_params(handle, &params);
        let mut errno = errno;

        if errno == 0 {
            let info = AddrInfo::from(&params);
            if let Err(e) = self.importer.import_opened(&mut conn, params.fd_note, &info) {
                tracing::warn!("{} failed to import {}: {}", self.kid_id, conn, e);
                errno = errno_of(&e);
                conn.close();
            }
        }

        if errno == 0 {
            tracing::debug!("{} joined {} {}", self.kid_id, conn, map_id);
        } else {
            tracing::debug!(
                "{} join {} {} failed: {}",
                self.kid_id,
                params.key(),
                map_id,
                std::io::Error::from_raw_os_error(errno)
            );
        }

        self.schedule(
            request.callback,
            StartListening {
                conn,
                errno,
                subscription: params.subscription,
                map_id,
            },
        );
        Ok(())
    }

    fn cancel_timer(&self, map_id: MapId) {
        if let Some((_, timer)) = self.timers.borrow_mut().remove(&map_id) {
            timer.abort();
        }
    }

    fn schedule(&self, callback: ListenCallback, outcome: StartListening) {
        self.providers
            .task()
            .spawn_task("start_listening", async move {
                callback(outcome);
            });
    }

    /// Dispatch one inbound message.
    ///
    /// Messages other than join responses belong to other subsystems and
    /// are ignored.
    pub fn receive(&self, message: TypedMessage) -> Result<(), ListenError> {
        match message.kind {
            MessageKind::SharedListenResponse => {
                let response = JoinResponse::unpack(message, &self.codec)?;
                self.on_joined(response)
            }
            other => {
                tracing::warn!("{} ignoring {} message", self.kid_id, other);
                Ok(())
            }
        }
    }

    /// Receive and dispatch messages until `source` closes.
    ///
    /// Malformed messages are logged and skipped.
    ///
    /// # Errors
    ///
    /// The first fatal protocol error, or a failure of the source itself.
    pub async fn run<S: MessageSource>(&self, source: &S) -> Result<(), ListenError> {
        loop {
            match source.recv().await {
                Ok(Some(message)) => {
                    if let Err(e) = self.receive(message) {
                        if e.is_fatal() {
                            tracing::error!("{} stopping dispatch: {}", self.kid_id, e);
                            return Err(e);
                        }
                        tracing::warn!("{} skipping message: {}", self.kid_id, e);
                    }
                }
                Ok(None) => {
                    tracing::debug!("{} message source closed", self.kid_id);
                    return Ok(());
                }
                Err(TransportError::Wire(e)) => {
                    tracing::warn!("{} skipping malformed frame: {}", self.kid_id, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
