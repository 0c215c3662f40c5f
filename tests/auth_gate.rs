use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use sniffproxy::capture::NullSink;
use sniffproxy::config::ServerConfig;
use sniffproxy::listener::Listener;

fn config(auth_token: Option<&str>) -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        via: None,
        auth_token: auth_token.map(str::to_string),
        sniff: false,
        signer: None,
        capture: Arc::new(NullSink),
    }
}

async fn spawn_listener(cfg: ServerConfig) -> (SocketAddr, sniffproxy::listener::ListenerHandle) {
    let listener = Listener::bind(cfg).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = listener.handle();
    tokio::spawn(listener.run());
    (addr, handle)
}

#[tokio::test]
async fn missing_credential_gets_407_challenge() {
    let (addr, handle) = spawn_listener(config(Some("dTpw"))).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET http://example.test/ HTTP/1.1\r\nHost: example.test\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_secs(1), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 407"));
    assert!(response.contains("Proxy-Authenticate: Basic"));

    handle.stop();
}

#[tokio::test]
async fn no_credential_configured_allows_unauthenticated_connect_attempt() {
    // With auth disabled, a CONNECT to an address nothing is listening on
    // should fail at the dial stage (503), not at authentication (407).
    let (addr, handle) = spawn_listener(config(None)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"CONNECT 127.0.0.1:1 HTTP/1.1\r\nHost: 127.0.0.1:1\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(!response.starts_with("HTTP/1.1 407"));

    handle.stop();
}
