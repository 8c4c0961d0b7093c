//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use forward_proxy::config::ProxyConfig;
use forward_proxy::{Monitor, ProxyHandle, ProxyServer};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Config bound to an ephemeral loopback port with small buffers.
pub fn test_config(buffer_size: usize) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1".into();
    config.listener.port = 0;
    config.workers.count = 2;
    config.buffers.size = buffer_size;
    config.buffers.min_buffers = 0;
    config.buffers.max_buffers = 256;
    config
}

/// Start a proxy with the monitor its config implies.
pub fn start_proxy(config: ProxyConfig) -> ProxyHandle {
    let server = ProxyServer::new(config);
    let monitor = server.configured_monitor();
    server.start(monitor).unwrap()
}

/// Start a proxy with an explicit monitor.
pub fn start_proxy_with(config: ProxyConfig, monitor: Arc<dyn Monitor>) -> ProxyHandle {
    ProxyServer::new(config).start(monitor).unwrap()
}

/// Start a backend that forwards each request header it receives and
/// replies with a fixed response, then closes.
pub async fn start_recording_backend(response: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let header = read_header(&mut socket).await;
                        let _ = tx.send(header);
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, rx)
}

/// Start a backend that echoes bytes until EOF, then closes its side.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let (mut reader, mut writer) = socket.split();
                        let _ = tokio::io::copy(&mut reader, &mut writer).await;
                        let _ = writer.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that reads until EOF, then answers with the byte count.
pub async fn start_counting_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut received = Vec::new();
                        let _ = socket.read_to_end(&mut received).await;
                        let reply = format!("received {} bytes", received.len());
                        let _ = socket.write_all(reply.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing listens on.
pub fn refused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Read until the blank line ending a header block.
pub async fn read_header(socket: &mut TcpStream) -> Vec<u8> {
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => header.push(byte[0]),
        }
    }
    header
}

/// Read everything until the peer closes, failing after `IO_TIMEOUT`.
pub async fn read_to_close(socket: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let result = tokio::time::timeout(IO_TIMEOUT, socket.read_to_end(&mut out)).await;
    assert!(result.is_ok(), "peer did not close within {IO_TIMEOUT:?}");
    out
}

/// Open a CONNECT tunnel through the proxy and consume the 200 line.
pub async fn open_tunnel(proxy: SocketAddr, target: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();

    let mut established = vec![0u8; forward_proxy::proxy::request::CONNECT_ESTABLISHED.len()];
    tokio::time::timeout(IO_TIMEOUT, client.read_exact(&mut established))
        .await
        .expect("timed out waiting for CONNECT response")
        .unwrap();
    assert_eq!(established, forward_proxy::proxy::request::CONNECT_ESTABLISHED);
    client
}

/// Poll `condition` until it holds or `IO_TIMEOUT` passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
