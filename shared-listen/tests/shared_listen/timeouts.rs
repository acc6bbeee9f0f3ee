//! Joins whose response never arrives in time.

use std::time::Duration;

use shared_listen::{reply_channel, ListenParams, SharedListenConfig, SystemImporter};
use tokio::task::LocalSet;

use super::{init_tracing, Harness, TestOpener};

fn short_timeout() -> SharedListenConfig {
    SharedListenConfig::default().with_join_timeout(Duration::from_millis(20))
}

#[tokio::test]
async fn test_late_response_is_discarded() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut harness =
                Harness::with_importer(TestOpener::default(), 1, short_timeout(), |_| SystemImporter);
            let params = ListenParams::tcp("127.0.0.1:0".parse().expect("addr"));

            let (callback, rx) = reply_channel();
            let first = harness.kid(0).join(params.clone(), callback).expect("join");

            let outcome = rx.await.expect("timeout outcome");
            assert_eq!(outcome.errno, libc::ETIMEDOUT);
            assert!(!outcome.conn.is_open());
            assert_eq!(harness.kid(0).pending_count(), 0);

            // Coordinator finally answers; the kid drops the stale handle.
            harness.pump_coordinator().await;
            harness.pump_kids().expect("late response is not fatal");

            // The id is free again once the late response has been seen.
            let (callback, rx) = reply_channel();
            let second = harness.kid(0).join(params, callback).expect("join again");
            assert_eq!(second, first);
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");
            assert!(rx.await.expect("outcome").is_ok());
        })
        .await;
}

#[tokio::test]
async fn test_answered_join_does_not_time_out() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut harness =
                Harness::with_importer(TestOpener::default(), 1, short_timeout(), |_| SystemImporter);

            let (callback, rx) = reply_channel();
            harness
                .kid(0)
                .join(ListenParams::udp("127.0.0.1:0".parse().expect("addr")), callback)
                .expect("join");
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let outcome = rx.await.expect("outcome");
            assert!(outcome.is_ok());

            tokio::time::sleep(Duration::from_millis(40)).await;
            assert_eq!(harness.kid(0).pending_count(), 0);
        })
        .await;
}
