//! Open failures, retries and protocol violations.

use shared_listen::{
    reply_channel, JoinResponse, JsonCodec, KidId, ListenError, ListenParams, MapId,
    ProcessAddress, ProtocolError, Transport,
};
use tokio::task::LocalSet;

use super::{init_tracing, Harness, TestOpener};

#[tokio::test]
async fn test_open_failure_reaches_caller_and_is_retried() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let opener = TestOpener::default();
            opener.fail_next.set(Some(libc::EADDRINUSE));
            let mut harness = Harness::new(opener, 1);
            let params = ListenParams::tcp("127.0.0.1:0".parse().expect("addr"));

            let (callback, rx) = reply_channel();
            harness.kid(0).join(params.clone(), callback).expect("join");
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let failed = rx.await.expect("outcome");
            assert_eq!(failed.errno, libc::EADDRINUSE);
            assert!(!failed.conn.is_open());
            assert!(harness.coordinator.table().is_empty());

            let (callback, rx) = reply_channel();
            harness.kid(0).join(params, callback).expect("join again");
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let retried = rx.await.expect("outcome");
            assert!(retried.is_ok());
            assert_eq!(harness.coordinator.opener().calls.get(), 2);
            assert_eq!(harness.coordinator.stats().open_failures, 1);
        })
        .await;
}

#[tokio::test]
async fn test_failure_for_one_kid_does_not_poison_the_key() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let opener = TestOpener::default();
            opener.fail_next.set(Some(libc::EACCES));
            let mut harness = Harness::new(opener, 2);
            let params = ListenParams::udp("127.0.0.1:0".parse().expect("addr"));

            let (cb_a, rx_a) = reply_channel();
            let (cb_b, rx_b) = reply_channel();
            harness.kid(0).join(params.clone(), cb_a).expect("join a");
            harness.kid(1).join(params, cb_b).expect("join b");
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let a = rx_a.await.expect("a outcome");
            let b = rx_b.await.expect("b outcome");
            assert_eq!(a.errno, libc::EACCES);
            assert!(b.is_ok());
        })
        .await;
}

#[tokio::test]
async fn test_response_for_unknown_id_stops_dispatch() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let harness = Harness::new(TestOpener::default(), 1);
            let bogus = JoinResponse::failure(libc::EIO, MapId(17))
                .pack(&JsonCodec)
                .expect("pack");
            harness
                .network
                .send(&ProcessAddress::Kid(KidId(1)), bogus)
                .expect("send");

            let (requestor, inbox) = &harness.kids[0];
            let err = requestor.run(inbox).await.expect_err("fatal");
            assert!(err.is_fatal());
            assert!(matches!(
                err,
                ListenError::Protocol(ProtocolError::UnknownCorrelationId(MapId(17)))
            ));
        })
        .await;
}

#[tokio::test]
async fn test_unreachable_coordinator_fails_join() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let harness = Harness::new(TestOpener::default(), 1);
            harness.network.unregister(&ProcessAddress::Coordinator);

            let (callback, rx) = reply_channel();
            let result = harness
                .kid(0)
                .join(ListenParams::tcp("127.0.0.1:0".parse().expect("addr")), callback);
            assert!(matches!(result, Err(ListenError::Transport(_))));
            assert_eq!(harness.kid(0).pending_count(), 0);

            let outcome = rx.await.expect("outcome");
            assert_eq!(outcome.errno, libc::EHOSTUNREACH);
            assert!(!outcome.conn.is_open());
        })
        .await;
}
