//! Dedicated idempotent-close scenario, mirroring the teacher's
//! one-file-per-scenario integration tests
//! (`nyx-transport/tests/enhanced_stun_stop_idempotent.rs`,
//! `tests/stun_stop_idempotent.rs`, `tests/path_validation_cancel*.rs`)
//! rather than folding this case into `tests/e2e.rs`.
//!
//! Exercises `Close` on both endpoint types: calling it more than once must
//! have the same effect as calling it once (§8 invariant 6), and every
//! caller blocked on `read_from`/`write_to` at the time must observe
//! `Error::Closed` promptly rather than hang (§4.5 `DEAD`, §5
//! Cancellation).

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nyx_pktconn::{ActiveEndpoint, Error, PacketConn, PassiveEndpoint};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use support::mock_channel::MockChannel;

const TIMEOUT: Duration = Duration::from_secs(2);

async fn loopback_write_half() -> OwnedWriteHalf {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), async { listener.accept().await.unwrap() });
    let (server_stream, _) = server;
    drop(server_stream);
    let (_read, write) = client.unwrap().into_split();
    write
}

#[tokio::test]
async fn active_endpoint_close_is_idempotent_and_unblocks_callers() {
    let local: SocketAddr = "127.0.0.1:19100".parse().unwrap();
    let peer: SocketAddr = "127.0.0.1:19101".parse().unwrap();
    let (active_chan, _passive_chan) = MockChannel::pair();
    let endpoint = Arc::new(ActiveEndpoint::for_testing(local, Arc::new(active_chan), loopback_write_half().await));

    // Never reaches READY: nothing seeds a frame into active_chan, so both
    // a blocked read and a blocked write (§4.5 INITIALIZING) are in flight
    // when close() fires.
    let reader = endpoint.clone();
    let read_handle = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        reader.read_from(&mut buf).await
    });
    let writer = endpoint.clone();
    let write_handle = tokio::spawn(async move { writer.write_to(b"hello", peer).await });

    tokio::time::sleep(Duration::from_millis(20)).await;

    endpoint.close().await.unwrap();
    endpoint.close().await.unwrap();
    endpoint.close().await.unwrap();

    let read_result = tokio::time::timeout(TIMEOUT, read_handle)
        .await
        .expect("read_from must unblock once closed")
        .unwrap();
    assert!(matches!(read_result, Err(Error::Closed)));

    let write_result = tokio::time::timeout(TIMEOUT, write_handle)
        .await
        .expect("write_to must unblock once closed")
        .unwrap();
    assert!(matches!(write_result, Err(Error::Closed)));
}

#[tokio::test]
async fn passive_endpoint_close_is_idempotent_and_unblocks_callers() {
    let local: SocketAddr = "127.0.0.1:19102".parse().unwrap();
    let peer: SocketAddr = "127.0.0.1:19103".parse().unwrap();
    let (passive_chan, _active_chan) = MockChannel::pair();
    let endpoint = Arc::new(PassiveEndpoint::for_testing(local, Arc::new(passive_chan)));

    let reader = endpoint.clone();
    let read_handle = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        reader.read_from(&mut buf).await
    });
    let writer = endpoint.clone();
    let write_handle = tokio::spawn(async move { writer.write_to(b"hello", peer).await });

    tokio::time::sleep(Duration::from_millis(20)).await;

    endpoint.close().await.unwrap();
    endpoint.close().await.unwrap();
    endpoint.close().await.unwrap();

    let read_result = tokio::time::timeout(TIMEOUT, read_handle)
        .await
        .expect("read_from must unblock once closed")
        .unwrap();
    assert!(matches!(read_result, Err(Error::Closed)));

    let write_result = tokio::time::timeout(TIMEOUT, write_handle)
        .await
        .expect("write_to must unblock once closed")
        .unwrap();
    assert!(matches!(write_result, Err(Error::Closed)));
}
