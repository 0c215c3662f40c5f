use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use sniffproxy::capture::NullSink;
use sniffproxy::config::ServerConfig;
use sniffproxy::listener::Listener;

fn config(listen_addr: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen_addr,
        via: None,
        auth_token: None,
        sniff: false,
        signer: None,
        capture: Arc::new(NullSink),
    }
}

/// A stub target that echoes whatever it receives, standing in for the
/// real endpoint a `CONNECT` tunnel would dial.
async fn spawn_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            while let Ok(n) = socket.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                if socket.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    });
    addr
}

#[tokio::test]
async fn connect_tunnel_is_transparent_without_interception() {
    let target_addr = spawn_echo_target().await;

    let proxy_config = config("127.0.0.1:0".parse().unwrap());
    let proxy = Listener::bind(proxy_config).await.unwrap();
    let proxy_addr = proxy.local_addr().unwrap();
    let handle = proxy.handle();
    tokio::spawn(proxy.run());

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    let connect_request = format!(
        "CONNECT {target_addr} HTTP/1.1\r\nHost: {target_addr}\r\n\r\n"
    );
    client.write_all(connect_request.as_bytes()).await.unwrap();

    let mut buf = [0u8; 1024];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 200"));

    client.write_all(b"hello through the tunnel").await.unwrap();
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"hello through the tunnel");

    handle.stop();
}
