/*!
 * # Sniffproxy
 *
 * A forward HTTP/HTTPS proxy with optional TLS-intercepting traffic capture.
 *
 * ## Features
 *
 * - **HTTP Relay**: standard HTTP proxying with hop-by-hop header stripping
 *   and `Via` chaining.
 * - **CONNECT Tunneling**: transparent byte-pump tunneling for HTTPS.
 * - **TLS Interception**: optional MITM capture of tunneled traffic via a
 *   self-signed CA and per-host leaf certificates.
 * - **Proxy Authentication**: `Proxy-Authorization: Basic` gate.
 * - **Graceful Shutdown**: the acceptor drains in-flight sessions before
 *   returning.
 *
 * ## Modules
 *
 * - `config`: command-line argument parsing and the immutable server configuration.
 * - `error`: the crate-wide error type and its client-facing status mapping.
 * - `demux`: request-head parsing and classification.
 * - `auth`: `Proxy-Authorization` enforcement.
 * - `relay`: the non-`CONNECT` HTTP relay engine.
 * - `tunnel`: the `CONNECT` tunnel and TLS interception engine.
 * - `signer`: the certificate-signing contract and its default implementation.
 * - `capture`: the traffic-capture sink contract and its file-backed implementation.
 * - `session`: the per-connection task body.
 * - `listener`: the accept loop and graceful-shutdown coordination.
 */

pub mod auth;
pub mod capture;
pub mod config;
pub mod demux;
pub mod error;
pub mod listener;
pub mod relay;
pub mod session;
pub mod signer;
pub mod tunnel;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::listener::Listener;

/// Bind and run the proxy server with the given configuration. Runs until
/// the returned listener is stopped via its handle (see
/// [`listener::ListenerHandle::stop`]) and every in-flight session has
/// drained.
pub async fn run(config: ServerConfig) -> Result<()> {
    tracing::info!(addr = %config.listen_addr, sniff = config.sniff, "starting proxy server");

    let listener = Listener::bind(config).await?;
    let handle = listener.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            handle.stop();
        }
    });

    listener.run().await;
    tracing::info!("proxy server shut down");
    Ok(())
}
