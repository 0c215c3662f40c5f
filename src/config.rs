/*!
 * # Configuration
 *
 * Command-line flag parsing and the immutable server configuration derived
 * from it.
 */

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use clap::Parser;

use crate::capture::{CaptureSink, FileCaptureSink, NullSink};
use crate::error::{Error, Result};
use crate::signer::{CertSigner, RcgenSigner};

/// Proxy server configuration, as parsed from command-line flags.
///
/// Field names and defaults are contractual: `host` defaults to `:`, `port`
/// to `8080`, and a trailing `:` is always ensured on `host` before it is
/// concatenated with the port.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Address to bind the proxy server to.
    #[arg(long, default_value = ":")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Value appended to the `Via` header of forwarded requests, when non-empty.
    #[arg(long, default_value = "")]
    pub via: String,

    /// `user:password` credential required of clients via `Proxy-Authorization`.
    /// Empty disables authentication.
    #[arg(long, default_value = "")]
    pub auth: String,

    /// Enable TLS interception and traffic capture.
    #[arg(long, default_value_t = false)]
    pub sniff: bool,

    /// Directory capture record files are written to.
    #[arg(long, default_value = ".")]
    pub capture_dir: PathBuf,
}

impl Config {
    /// Parse command-line arguments into a `Config`.
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Resolve `host`/`port` into a `SocketAddr`, ensuring `host` ends in `:`
    /// before concatenation. A bare `:` (the default) means "all interfaces",
    /// matching the original tool's `net.Listen("tcp", ":8080")` convention.
    pub fn get_bind_addr(&self) -> Result<SocketAddr> {
        let mut host = self.host.clone();
        if !host.ends_with(':') {
            host.push(':');
        }
        let interface = host.trim_end_matches(':');
        let interface = if interface.is_empty() {
            "0.0.0.0"
        } else {
            interface
        };
        let addr = format!("{interface}:{}", self.port);
        addr.parse()
            .map_err(|e| Error::Custom(format!("invalid bind address ({addr}): {e}")))
    }

    /// The base64 token clients must present via `Proxy-Authorization: Basic <token>`,
    /// or `None` if authentication is disabled.
    pub fn auth_token(&self) -> Option<String> {
        if self.auth.is_empty() {
            None
        } else {
            Some(base64::engine::general_purpose::STANDARD.encode(&self.auth))
        }
    }

    /// Build the immutable `ServerConfig` consumed by the rest of the
    /// pipeline, validating along the way.
    pub fn into_server_config(self) -> Result<ServerConfig> {
        let listen_addr = self.get_bind_addr()?;
        let auth_token = self.auth_token();
        let via = if self.via.is_empty() {
            None
        } else {
            Some(self.via.clone())
        };

        let signer: Option<Arc<dyn CertSigner>> = if self.sniff {
            Some(Arc::new(RcgenSigner::new()?))
        } else {
            None
        };

        let capture: Arc<dyn CaptureSink> = if self.sniff {
            Arc::new(FileCaptureSink::new(self.capture_dir.clone()))
        } else {
            Arc::new(NullSink)
        };

        Ok(ServerConfig {
            listen_addr,
            via,
            auth_token,
            sniff: self.sniff,
            signer,
            capture,
        })
    }
}

/// Immutable configuration shared by every session, assembled once before
/// `Listener::start`.
#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub via: Option<String>,
    pub auth_token: Option<String>,
    pub sniff: bool,
    pub signer: Option<Arc<dyn CertSigner>>,
    pub capture: Arc<dyn CaptureSink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: u16) -> Config {
        Config {
            host: host.to_string(),
            port,
            via: String::new(),
            auth: String::new(),
            sniff: false,
            capture_dir: PathBuf::from("."),
        }
    }

    #[test]
    fn trailing_colon_is_ensured() {
        let cfg = config(":", 8000);
        let addr = cfg.get_bind_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn explicit_host_is_respected() {
        let cfg = config("127.0.0.1:", 9000);
        let addr = cfg.get_bind_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn empty_auth_disables_authentication() {
        let cfg = config("127.0.0.1:", 9000);
        assert!(cfg.auth_token().is_none());
    }

    #[test]
    fn auth_token_is_base64_of_user_password() {
        let mut cfg = config("127.0.0.1:", 9000);
        cfg.auth = "u:p".to_string();
        assert_eq!(cfg.auth_token().unwrap(), "dTpw");
    }
}
