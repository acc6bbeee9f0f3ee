//! Equal keys share a socket, different keys do not.

use shared_listen::{
    reply_channel, FdNote, HandlerKind, ListenParams, OpenFlags, SocketType, Subscription,
};
use tokio::task::LocalSet;

use super::{init_tracing, Harness, TestOpener};

#[tokio::test]
async fn test_cosmetic_differences_share_one_socket() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut harness = Harness::new(TestOpener::default(), 2);
            let addr = "127.0.0.1:0".parse().expect("addr");

            let (cb_a, rx_a) = reply_channel();
            let (cb_b, rx_b) = reply_channel();
            harness
                .kid(0)
                .join(ListenParams::tcp(addr).with_note(FdNote::HttpSocket), cb_a)
                .expect("join a");
            harness
                .kid(1)
                .join(
                    ListenParams::tcp(addr)
                        .with_flags(OpenFlags::REUSEADDR | OpenFlags::NONBLOCKING)
                        .with_note(FdNote::HttpsSocket),
                    cb_b,
                )
                .expect("join b");

            assert_eq!(harness.pump_coordinator().await, 2);
            harness.pump_kids().expect("responses");

            let a = rx_a.await.expect("a outcome");
            let b = rx_b.await.expect("b outcome");
            assert!(a.is_ok() && b.is_ok());
            assert_ne!(a.conn.local.port(), 0);
            assert_eq!(a.conn.local, b.conn.local);

            assert_eq!(harness.coordinator.opener().calls.get(), 1);
            assert_eq!(harness.coordinator.table().len(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_different_keys_get_different_sockets() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut harness = Harness::new(TestOpener::default(), 1);
            let requests = [
                ListenParams::tcp("127.0.0.1:0".parse().expect("addr")),
                ListenParams::udp("127.0.0.1:0".parse().expect("addr")),
                ListenParams::tcp("127.0.0.2:0".parse().expect("addr")),
            ];

            let mut receivers = Vec::new();
            for params in requests {
                let (callback, rx) = reply_channel();
                harness.kid(0).join(params, callback).expect("join");
                receivers.push(rx);
            }
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let mut outcomes = Vec::new();
            for rx in receivers {
                let outcome = rx.await.expect("outcome");
                assert!(outcome.is_ok(), "errno {}", outcome.errno);
                outcomes.push(outcome);
            }

            assert_eq!(outcomes[0].conn.sock_type, SocketType::Stream);
            assert_eq!(outcomes[1].conn.sock_type, SocketType::Datagram);
            assert_ne!(outcomes[0].conn.local, outcomes[2].conn.local);
            assert_eq!(harness.coordinator.opener().calls.get(), 3);
            assert_eq!(harness.coordinator.table().len(), 3);
        })
        .await;
}

#[tokio::test]
async fn test_connection_keeps_request_fields() {
    init_tracing();
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut harness = Harness::new(TestOpener::default(), 1);
            let subscription = Subscription::new(HandlerKind::HttpsAccept, 42);
            let params = ListenParams::tcp("127.0.0.1:0".parse().expect("addr"))
                .with_flags(OpenFlags::REUSEADDR)
                .with_note(FdNote::HttpsSocket)
                .with_subscription(subscription);

            let (callback, rx) = reply_channel();
            harness.kid(0).join(params.clone(), callback).expect("join");
            harness.pump_coordinator().await;
            harness.pump_kids().expect("responses");

            let outcome = rx.await.expect("outcome");
            assert!(outcome.is_ok());
            assert_eq!(outcome.subscription, subscription);
            assert_eq!(outcome.conn.flags, params.flags);
            assert_eq!(outcome.conn.note, FdNote::HttpsSocket);
            assert_eq!(outcome.conn.protocol, params.protocol);
            assert_eq!(outcome.conn.local.ip(), params.addr.ip());
        })
        .await;
}
