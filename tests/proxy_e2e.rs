//! End-to-end tests: real sockets through a running proxy.

use std::sync::Arc;
use std::time::Duration;

use forward_proxy::monitor::{ChannelMonitor, Monitor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

#[tokio::test]
async fn plain_get_is_forwarded_verbatim() {
    let response = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";
    let (backend, mut requests) = common::start_recording_backend(response).await;
    let proxy = common::start_proxy(common::test_config(1024));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    let request = format!(
        "GET http://{backend}/index.html HTTP/1.1\r\nHost: {backend}\r\nUser-Agent: e2e\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let received = tokio::time::timeout(common::IO_TIMEOUT, requests.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, request.as_bytes());

    let body = common::read_to_close(&mut client).await;
    assert_eq!(body, response.as_bytes());

    proxy.shutdown();
}

#[tokio::test]
async fn connect_tunnel_relays_opaque_bytes() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::test_config(1024));

    let mut tunnel = common::open_tunnel(proxy.local_addr(), backend).await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(700).collect();
    tunnel.write_all(&payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    tokio::time::timeout(common::IO_TIMEOUT, tunnel.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, payload);

    proxy.shutdown();
}

#[tokio::test]
async fn single_token_request_closes_client() {
    let proxy = common::start_proxy(common::test_config(1024));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    client.write_all(b"GET\r\n\r\n").await.unwrap();

    let reply = common::read_to_close(&mut client).await;
    assert!(reply.is_empty());

    proxy.shutdown();
}

#[tokio::test]
async fn refused_destination_closes_client() {
    let target = common::refused_addr();
    let proxy = common::start_proxy(common::test_config(1024));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    let request = format!("GET http://{target}/ HTTP/1.1\r\nHost: {target}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let mut reply = Vec::new();
    let read = tokio::time::timeout(common::IO_TIMEOUT, client.read_to_end(&mut reply)).await;
    assert!(read.is_ok(), "client was not closed");
    assert!(reply.is_empty());

    proxy.shutdown();
}

#[tokio::test]
async fn client_half_close_reaches_host() {
    let backend = common::start_counting_backend().await;
    let proxy = common::start_proxy(common::test_config(1024));

    let mut tunnel = common::open_tunnel(proxy.local_addr(), backend).await;
    tunnel.write_all(&[7u8; 300]).await.unwrap();
    tunnel.shutdown().await.unwrap();

    let reply = common::read_to_close(&mut tunnel).await;
    assert_eq!(reply, b"received 300 bytes");

    proxy.shutdown();
}

#[tokio::test]
async fn request_sent_with_eof_is_forwarded_and_half_closed() {
    let backend = common::start_counting_backend().await;
    let proxy = common::start_proxy(common::test_config(1024));

    let mut client = TcpStream::connect(proxy.local_addr()).await.unwrap();
    let request = format!("GET http://{backend}/ HTTP/1.0\r\nHost: {backend}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let reply = common::read_to_close(&mut client).await;
    assert_eq!(reply, format!("received {} bytes", request.len()).as_bytes());

    proxy.shutdown();
}

#[tokio::test]
async fn large_transfer_through_small_buffers() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::test_config(64));

    let tunnel = common::open_tunnel(proxy.local_addr(), backend).await;
    let (mut reader, mut writer) = tunnel.into_split();

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let sender = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut echoed = Vec::new();
    tokio::time::timeout(Duration::from_secs(20), reader.read_to_end(&mut echoed))
        .await
        .expect("transfer stalled")
        .unwrap();
    sender.await.unwrap();

    assert_eq!(echoed.len(), expected.len());
    assert!(echoed == expected);

    proxy.shutdown();
}

#[tokio::test]
async fn concurrent_tunnels_stay_separate() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::test_config(512));
    let proxy_addr = proxy.local_addr();

    let mut sessions = Vec::new();
    for i in 0..20u8 {
        sessions.push(tokio::spawn(async move {
            let mut tunnel = common::open_tunnel(proxy_addr, backend).await;
            let message = vec![i; 100 + usize::from(i)];
            tunnel.write_all(&message).await.unwrap();
            tunnel.shutdown().await.unwrap();
            let echoed = common::read_to_close(&mut tunnel).await;
            assert_eq!(echoed, message);
        }));
    }
    for session in sessions {
        session.await.unwrap();
    }

    proxy.shutdown();
}

#[tokio::test]
async fn buffers_return_to_pool_after_close() {
    let backend = common::start_echo_backend().await;
    let proxy = common::start_proxy(common::test_config(256));

    for _ in 0..5 {
        let mut tunnel = common::open_tunnel(proxy.local_addr(), backend).await;
        tunnel.write_all(b"ping").await.unwrap();
        tunnel.shutdown().await.unwrap();
        assert_eq!(common::read_to_close(&mut tunnel).await, b"ping");
    }

    let pool = Arc::clone(proxy.pool());
    assert!(common::eventually(|| pool.in_use() == 0).await, "buffers still lent: {}", pool.in_use());
    assert!(pool.allocated() <= 256);

    proxy.shutdown();
}

#[tokio::test]
async fn monitor_sees_bridged_pairs_until_closed() {
    let backend = common::start_echo_backend().await;
    let monitor = Arc::new(ChannelMonitor::new(None, true));
    let proxy = common::start_proxy_with(common::test_config(256), monitor.clone());

    let mut tunnel = common::open_tunnel(proxy.local_addr(), backend).await;
    assert!(common::eventually(|| monitor.report().active_pairs == 1).await);

    let report = monitor.report();
    assert_eq!(report.pairs[0].host.name, backend.to_string());
    assert_eq!(report.pairs[0].client.input_closed, Some(false));

    tunnel.shutdown().await.unwrap();
    common::read_to_close(&mut tunnel).await;
    drop(tunnel);

    assert!(common::eventually(|| monitor.report().active_pairs == 0).await);

    proxy.shutdown();
}
