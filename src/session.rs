/*!
 * # Session
 *
 * The per-connection task body: demultiplex, authenticate, then dispatch to
 * the relay or tunnel engine. One session owns its client socket
 * exclusively and closes it exactly once, on return.
 */

use tokio::net::TcpStream;

use crate::auth::{authenticate, AuthOutcome};
use crate::config::ServerConfig;
use crate::demux::{read_request_head, write_status_only, RequestHead};
use crate::error::Result;
use crate::relay;
use crate::tunnel;

/// Handle one accepted client connection end to end.
pub async fn handle_session(stream: TcpStream, config: ServerConfig) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::debug!(peer = %peer, "session started");

    if let Err(e) = run_session(stream, config).await {
        tracing::debug!(peer = %peer, error = %e, "session ended with error");
    }

    tracing::debug!(peer = %peer, "session closed");
}

/// `stream` is owned throughout: the relay path only ever needs `&mut`
/// access to it, while the tunnel path needs to move it into a `TlsAcceptor`
/// once interception kicks in. Owning it up front lets both paths coexist
/// without a separate hand-off step.
async fn run_session(mut stream: TcpStream, config: ServerConfig) -> Result<()> {
    let mut req: RequestHead = match read_request_head(&mut stream).await {
        Ok(req) => req,
        Err(e) => {
            let _ = write_status_only(&mut stream, 400, "Bad Request").await;
            return Err(e);
        }
    };

    if let AuthOutcome::Denied = authenticate(&mut req, &config) {
        let response = "HTTP/1.1 407 Proxy Authentication Required\r\n\
             Proxy-Authenticate: Basic\r\n\
             Content-Length: 0\r\n\
             Connection: close\r\n\r\n";
        tokio::io::AsyncWriteExt::write_all(&mut stream, response.as_bytes()).await?;
        return Ok(());
    }

    if req.is_connect() {
        tunnel::handle_tunnel(req, stream, &config).await
    } else {
        relay::handle_relay(req, &mut stream, &config).await
    }
}
