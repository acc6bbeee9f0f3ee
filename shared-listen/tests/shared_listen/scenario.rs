//! Two workers join the same HTTP port before either hears back.

use std::cell::RefCell;
use std::rc::Rc;

use shared_listen::{
    FdNote, ListenParams, SharedListenConfig, StartListening, Subscription, HandlerKind,
};
use tokio::task::LocalSet;

use super::{init_tracing, Harness, KeepAddressImporter, TestOpener};

#[tokio::test]
async fn test_two_kids_share_port_3128() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let importer = KeepAddressImporter::default();
            let mut harness = Harness::with_importer(
                TestOpener::loopback(),
                2,
                SharedListenConfig::default(),
                |_| importer.clone(),
            );
            let addr = "0.0.0.0:3128".parse().expect("addr");
            let results: Rc<RefCell<Vec<(usize, StartListening)>>> = Rc::default();

            for kid in 0..2 {
                let sink = Rc::clone(&results);
                let params = ListenParams::tcp(addr)
                    .with_note(FdNote::HttpSocket)
                    .with_subscription(Subscription::new(HandlerKind::HttpAccept, kid as u64));
                harness
                    .kid(kid)
                    .join(
                        params,
                        Box::new(move |outcome: StartListening| {
                            sink.borrow_mut().push((kid, outcome));
                        }),
                    )
                    .expect("join");
            }

            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");
            assert!(results.borrow().is_empty(), "callbacks must not run inline");

            tokio::task::yield_now().await;
            let mut results = results.take();
            results.sort_by_key(|(kid, _)| *kid);
            assert_eq!(results.len(), 2);
            assert_eq!(harness.coordinator.opener().calls.get(), 1);
            assert_eq!(importer.imports.get(), 2);

            let (_, mut a) = results.remove(0);
            let (_, b) = results.remove(0);
            for outcome in [&a, &b] {
                assert_eq!(outcome.errno, 0);
                assert!(outcome.conn.is_open());
                assert_eq!(outcome.conn.local, addr);
            }
            assert_eq!(b.subscription.token, 1);

            // Closing one worker's copy leaves the other usable.
            let bound = b.conn.handle().expect("b handle").local_addr().expect("b addr");
            a.conn.close();
            let listener = b
                .conn
                .handle()
                .expect("b handle")
                .duplicate()
                .expect("dup")
                .into_tcp_listener();
            let _client = std::net::TcpStream::connect(bound).expect("connect");
            listener.accept().expect("b still accepts");
        })
        .await;
}
