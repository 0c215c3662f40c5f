//! Crate-wide error type.
//!
//! One variant per failure kind in the error-handling design: each knows the
//! HTTP status (if any) its disposition requires, so call sites don't have to
//! re-derive policy from the error value.

use thiserror::Error;

/// Errors that can occur while accepting, classifying, or serving a proxied
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed request head: {0}")]
    ClientProtocol(String),

    #[error("authentication failed")]
    AuthFailure,

    #[error("failed to reach upstream {host}: {source}")]
    UpstreamDial {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream round trip failed: {0}")]
    UpstreamRoundTrip(#[from] reqwest::Error),

    #[error("could not take ownership of client socket: {0}")]
    Hijack(String),

    #[error("TLS handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("capture sink write failed: {0}")]
    CaptureIo(#[source] std::io::Error),

    #[error("accept failed: {0}")]
    AcceptTransient(#[source] std::io::Error),

    #[error("failed to bind listen address: {0}")]
    BindFailure(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse HTTP request head: {0}")]
    HttpParse(#[from] httparse::Error),

    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// The HTTP status code a conformant client should see for this error,
    /// if the failure occurred before any response has been committed.
    ///
    /// Returns `None` for errors that occur after the point of no return
    /// (e.g. mid-tunnel, mid-body) where the only correct action is to
    /// terminate the stream silently.
    pub fn client_status(&self) -> Option<u16> {
        match self {
            Error::AuthFailure => Some(407),
            Error::UpstreamDial { .. } | Error::UpstreamRoundTrip(_) => Some(503),
            Error::Hijack(_) => Some(500),
            Error::HandshakeFailure(_) => Some(503),
            Error::ClientProtocol(_) => Some(400),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Custom(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Custom(msg)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
