//! Test harness: one coordinator and several requestors on a local network.

mod dedup;
mod failures;
mod scenario;
mod timeouts;
mod unix_ipc;

use std::cell::Cell;
use std::io;
use std::rc::Rc;

use async_trait::async_trait;
use shared_listen::{
    AddrInfo, Connection, Coordinator, FdNote, Importer, KidId, LocalInbox, LocalNetwork,
    ListenKey, OpenFlags, Opener, ProcessAddress, Requestor, SharedListenConfig, SocketHandle,
    SystemImporter, SystemOpener, TokioProviders,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Opener that records calls and fails on demand.
///
/// With `loopback` set it ignores the requested address and binds an
/// ephemeral loopback port, so tests can ask for well-known ports.
#[derive(Default)]
pub struct TestOpener {
    inner: SystemOpener,
    pub calls: Cell<u32>,
    pub fail_next: Cell<Option<i32>>,
    pub loopback: bool,
}

impl TestOpener {
    pub fn loopback() -> Self {
        Self {
            loopback: true,
            ..Self::default()
        }
    }
}

#[async_trait(?Send)]
impl Opener for TestOpener {
    async fn open(&self, key: &ListenKey, flags: OpenFlags) -> io::Result<SocketHandle> {
        self.calls.set(self.calls.get() + 1);
        if let Some(errno) = self.fail_next.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if self.loopback {
            let local = ListenKey::new(key.sock_type, key.protocol, "127.0.0.1:0".parse().expect("addr"));
            return self.inner.open(&local, flags).await;
        }
        self.inner.open(key, flags).await
    }
}

/// Importer that keeps the requested address on the connection.
///
/// Clones share the import counter.
#[derive(Clone, Default)]
pub struct KeepAddressImporter {
    pub imports: Rc<Cell<u32>>,
}

impl Importer for KeepAddressImporter {
    fn import_opened(&self, conn: &mut Connection, note: FdNote, _info: &AddrInfo) -> io::Result<()> {
        self.imports.set(self.imports.get() + 1);
        conn.note = note;
        Ok(())
    }
}

pub type Kid<I> = Requestor<LocalNetwork, I, TokioProviders>;

/// Coordinator and kids wired to one in-process network.
///
/// Messages are pumped explicitly so tests control delivery order.
pub struct Harness<I: Importer> {
    pub network: LocalNetwork,
    pub coordinator: Coordinator<TestOpener, LocalNetwork>,
    pub coordinator_inbox: LocalInbox,
    pub kids: Vec<(Kid<I>, LocalInbox)>,
}

impl Harness<SystemImporter> {
    pub fn new(opener: TestOpener, kids: u32) -> Self {
        Self::with_importer(opener, kids, SharedListenConfig::default(), |_| SystemImporter)
    }
}

impl<I: Importer> Harness<I> {
    pub fn with_importer(
        opener: TestOpener,
        kids: u32,
        config: SharedListenConfig,
        importer: impl Fn(u32) -> I,
    ) -> Self {
        let network = LocalNetwork::new();
        let coordinator_inbox = network.register(ProcessAddress::Coordinator);
        let coordinator = Coordinator::new(opener, network.clone());
        let kids = (1..=kids)
            .map(|id| {
                let inbox = network.register(ProcessAddress::Kid(KidId(id)));
                let requestor = Requestor::new(
                    KidId(id),
                    network.clone(),
                    importer(id),
                    TokioProviders::new(),
                    config.clone(),
                );
                (requestor, inbox)
            })
            .collect();
        Self {
            network,
            coordinator,
            coordinator_inbox,
            kids,
        }
    }

    pub fn kid(&self, index: usize) -> &Kid<I> {
        &self.kids[index].0
    }

    /// Let the coordinator handle everything queued for it.
    pub async fn pump_coordinator(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.coordinator_inbox.try_recv() {
            if let Err(e) = self.coordinator.receive(message).await {
                tracing::warn!("coordinator: {}", e);
            }
            handled += 1;
        }
        handled
    }

    /// Deliver queued responses to every kid.
    pub fn pump_kids(&self) -> Result<(), shared_listen::ListenError> {
        for (requestor, inbox) in &self.kids {
            while let Some(message) = inbox.try_recv() {
                requestor.receive(message)?;
            }
        }
        Ok(())
    }
}
