use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use sniffproxy::capture::NullSink;
use sniffproxy::config::ServerConfig;
use sniffproxy::listener::Listener;

fn config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        via: None,
        auth_token: None,
        sniff: false,
        signer: None,
        capture: Arc::new(NullSink),
    }
}

#[tokio::test]
async fn stop_returns_promptly_with_no_active_sessions() {
    let listener = Listener::bind(config()).await.unwrap();
    let handle = listener.handle();
    let run_task = tokio::spawn(listener.run());

    handle.stop();

    let result = timeout(Duration::from_secs(1), run_task).await;
    assert!(result.is_ok(), "listener did not shut down promptly");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let listener = Listener::bind(config()).await.unwrap();
    let handle = listener.handle();
    let run_task = tokio::spawn(listener.run());

    handle.stop();
    handle.stop();

    let result = timeout(Duration::from_secs(1), run_task).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn connections_accepted_during_shutdown_race_are_not_stuck_open() {
    let listener = Listener::bind(config()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = listener.handle();
    let run_task = tokio::spawn(listener.run());

    // Connect and immediately request shutdown; whether this particular
    // connection is accepted before or after the race, the listener must
    // still drain and return.
    let mut client = TcpStream::connect(addr).await.unwrap();
    let _ = client.write_all(b"GET / HTTP/1.1\r\n\r\n").await;
    handle.stop();

    let result = timeout(Duration::from_secs(2), run_task).await;
    assert!(result.is_ok(), "listener did not drain in-flight session promptly");
}
