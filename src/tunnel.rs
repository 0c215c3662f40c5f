/*!
 * # Tunnel Engine & Interception Engine
 *
 * State machine for `CONNECT` requests: `Dial -> Ack -> [TlsHandshake] ->
 * Relay -> Failed`. Modeled as a function per state chained by `?` rather
 * than an enum with runtime dispatch, so the byte-pump hot path has no
 * indirection.
 *
 * When interception is disabled the tunnel is a transparent byte pump
 * between the client and a plain TCP socket to the target. When enabled,
 * the proxy terminates the client's TLS with a leaf certificate signed for
 * the requested host, re-originates TLS to the real upstream, and tees the
 * plaintext observed on both sides into a single capture record.
 */

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig as RustlsServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::capture::CaptureGuard;
use crate::config::ServerConfig;
use crate::demux::{write_error_response, RequestHead};
use crate::error::{Error, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse a `CONNECT` target (`host:port`, optionally missing the port) into
/// its host and port parts, defaulting the port to 443.
fn split_target(target: &str) -> (String, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) => port
            .parse::<u16>()
            .map(|p| (host.to_string(), p))
            .unwrap_or_else(|_| (target.to_string(), 443)),
        None => (target.to_string(), 443),
    }
}

/// Drive a `CONNECT` request through the tunnel state machine. Takes
/// ownership of the client socket: once a `CONNECT` is accepted, the
/// session's only remaining job is to bridge bytes (and, in intercept mode,
/// hijack the socket into a TLS stream).
pub async fn handle_tunnel(
    req: RequestHead,
    mut client: TcpStream,
    config: &ServerConfig,
) -> Result<()> {
    let (host, port) = split_target(&req.target);

    // -- Dial --
    let upstream = match timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            write_error_response(&mut client, 503, &e.to_string()).await?;
            return Err(Error::UpstreamDial { host, source: e });
        }
        Err(_) => {
            let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
            write_error_response(&mut client, 503, "connect timed out").await?;
            return Err(Error::UpstreamDial { host, source: e });
        }
    };

    // -- Ack --
    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    let capture = if config.sniff {
        Some(CaptureGuard::new(
            config.capture.clone(),
            config.capture.open().await?,
        ))
    } else {
        None
    };

    if config.sniff {
        match run_intercepted(client, upstream, &host, config, capture.as_ref()).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(host = %host, error = %e, "interception failed, tunnel dropped");
            }
        }
    } else {
        run_plain(&mut client, upstream).await;
    }

    if let Some(guard) = capture {
        guard.close().await?;
    }

    Ok(())
}

/// Plain (non-intercepted) relay: pump raw bytes in both directions until
/// either side closes, then close both sockets. This is the minimal-but-
/// correct half-close simplification noted in the spec.
async fn run_plain(client: &mut TcpStream, mut upstream: TcpStream) {
    let (mut client_rd, mut client_wr) = client.split();
    let (mut upstream_rd, mut upstream_wr) = upstream.split();

    let client_to_upstream = tokio::io::copy(&mut client_rd, &mut upstream_wr);
    let upstream_to_client = tokio::io::copy(&mut upstream_rd, &mut client_wr);

    tokio::select! {
        result = client_to_upstream => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "client->upstream pump ended");
            }
        }
        result = upstream_to_client => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "upstream->client pump ended");
            }
        }
    }
}

/// TLS-intercepted relay: terminate the client's TLS with a signed leaf,
/// re-originate TLS to the upstream, and tee plaintext from both directions
/// into the capture record.
async fn run_intercepted(
    client: TcpStream,
    upstream: TcpStream,
    host: &str,
    config: &ServerConfig,
    capture: Option<&CaptureGuard>,
) -> Result<()> {
    let signer = config
        .signer
        .as_ref()
        .ok_or_else(|| Error::HandshakeFailure("interception enabled but no signer configured".to_string()))?;

    let leaf = signer.sign(host).await?;

    let server_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(leaf.chain, leaf.key)
        .map_err(|e| Error::HandshakeFailure(e.to_string()))?;
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let client_tls = acceptor
        .accept(client)
        .await
        .map_err(|e| Error::HandshakeFailure(format!("client TLS handshake: {e}")))?;

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        let _ = roots.add(cert);
    }
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::HandshakeFailure(format!("invalid server name: {host}")))?;
    let upstream_tls = connector
        .connect(server_name, upstream)
        .await
        .map_err(|e| Error::HandshakeFailure(format!("upstream TLS handshake: {e}")))?;

    let (mut client_rd, mut client_wr) = tokio::io::split(client_tls);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream_tls);

    let client_to_upstream = pump_and_capture(
        &mut client_rd,
        &mut upstream_wr,
        capture,
        b"> ",
    );
    let upstream_to_client = pump_and_capture(
        &mut upstream_rd,
        &mut client_wr,
        capture,
        b"< ",
    );

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }

    let _ = client_wr.shutdown().await;
    Ok(())
}

/// Copy bytes from `src` to `dst`, teeing each chunk into `capture` prefixed
/// with `direction` so an observer can tell the two directions apart in the
/// interleaved record.
async fn pump_and_capture<R, W>(
    src: &mut R,
    dst: &mut W,
    capture: Option<&CaptureGuard>,
    direction: &'static [u8],
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if dst.write_all(&buf[..n]).await.is_err() {
            break;
        }
        if let Some(guard) = capture {
            let _ = guard.write(direction).await;
            let _ = guard.write(&buf[..n]).await;
            let _ = guard.write(b"\n").await;
        }
    }
    let _ = dst.flush().await;
}
