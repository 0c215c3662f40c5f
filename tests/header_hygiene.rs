use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use sniffproxy::capture::NullSink;
use sniffproxy::config::ServerConfig;
use sniffproxy::listener::Listener;

fn config(listen_addr: SocketAddr, via: Option<&str>) -> ServerConfig {
    ServerConfig {
        listen_addr,
        via: via.map(str::to_string),
        auth_token: None,
        sniff: false,
        signer: None,
        capture: Arc::new(NullSink),
    }
}

/// A stub upstream HTTP server that captures the request it receives and
/// replies with a fixed 200 response.
async fn spawn_stub_upstream() -> (SocketAddr, tokio::sync::oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 8192];
            if let Ok(n) = socket.read(&mut buf).await {
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request);
            }
            let body = "ok";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    (addr, rx)
}

#[tokio::test]
async fn strips_hop_by_hop_and_injects_via() {
    let (upstream_addr, upstream_rx) = spawn_stub_upstream().await;

    let proxy_config = config("127.0.0.1:0".parse().unwrap(), Some("1.1 sniffproxy"));
    let proxy = Listener::bind(proxy_config).await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();
    let handle = proxy.handle();
    tokio::spawn(proxy.run());

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let request = format!(
        "GET http://{upstream_addr}/ HTTP/1.1\r\n\
         Host: {upstream_addr}\r\n\
         Connection: keep-alive\r\n\
         Proxy-Connection: keep-alive\r\n\
         \r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let mut buf = [0u8; 1024];
    let _ = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    let received = timeout(Duration::from_secs(2), upstream_rx)
        .await
        .unwrap()
        .unwrap();

    assert!(!received.to_ascii_lowercase().contains("connection:"));
    assert!(!received.to_ascii_lowercase().contains("proxy-connection:"));
    assert!(received.contains("Via: 1.1 sniffproxy"));

    handle.stop();
}
