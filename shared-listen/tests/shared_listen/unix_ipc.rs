//! Joining over Unix datagram sockets with real descriptor passing.

use shared_listen::{
    reply_channel, Coordinator, IpcConfig, KidId, ListenParams, MessageSource, ProcessAddress,
    Requestor, SharedListenConfig, SystemImporter, SystemOpener, TokioProviders, UnixEndpoint,
    UnixTransport,
};
use tokio::task::LocalSet;

use super::init_tracing;

#[tokio::test]
async fn test_handle_crosses_unix_socket() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let ipc = IpcConfig::new(dir.path()).with_prefix("it");

    let local = LocalSet::new();
    local
        .run_until(async {
            let coordinator_endpoint =
                UnixEndpoint::bind(&ipc, ProcessAddress::Coordinator).expect("bind coordinator");
            let kid_endpoint =
                UnixEndpoint::bind(&ipc, ProcessAddress::Kid(KidId(1))).expect("bind kid");

            let mut coordinator = Coordinator::new(
                SystemOpener::new(&SharedListenConfig::default()),
                UnixTransport::new(ipc.clone()),
            );
            let requestor = Requestor::new(
                KidId(1),
                UnixTransport::new(ipc.clone()),
                SystemImporter,
                TokioProviders::new(),
                SharedListenConfig::default(),
            );

            let params = ListenParams::tcp("127.0.0.1:0".parse().expect("addr"));
            let (callback, rx) = reply_channel();
            requestor.join(params.clone(), callback).expect("join");

            let request = coordinator_endpoint
                .recv()
                .await
                .expect("recv request")
                .expect("request");
            coordinator.receive(request).await.expect("handle request");

            let response = kid_endpoint
                .recv()
                .await
                .expect("recv response")
                .expect("response");
            assert!(response.handle.is_some());
            requestor.receive(response).expect("on_joined");

            let outcome = rx.await.expect("outcome");
            assert!(outcome.is_ok());

            let shared = coordinator
                .table()
                .get(&params.key())
                .expect("coordinator keeps its copy");
            assert_eq!(
                outcome.conn.local,
                shared.local_addr().expect("shared addr")
            );

            // The worker's copy accepts connections on the shared port.
            let listener = outcome
                .conn
                .handle()
                .expect("handle")
                .duplicate()
                .expect("dup")
                .into_tcp_listener();
            listener.set_nonblocking(false).expect("blocking");
            let _client = std::net::TcpStream::connect(outcome.conn.local).expect("connect");
            listener.accept().expect("accept");
        })
        .await;
}
