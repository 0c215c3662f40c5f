/*!
 * # Request Demultiplexer
 *
 * Reads one HTTP request head (request line + headers) from a client
 * connection and classifies it as a tunnel (`CONNECT`) or relay request.
 */

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

const MAX_HEAD_SIZE: usize = 64 * 1024;

/// A parsed request head: method, target, version, and headers in wire
/// order. The raw head bytes are kept so the relay engine can forward a
/// faithful reconstruction of what the client sent.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Resolve the request's target to an absolute `scheme://host[:port]`
    /// form, deriving host and scheme from the `Host` header (defaulting to
    /// `http`) when the request target has no host component of its own.
    pub fn absolute_target(&self) -> Result<String> {
        if self.target.starts_with("http://") || self.target.starts_with("https://") {
            return Ok(self.target.clone());
        }
        let host = self
            .header("host")
            .ok_or_else(|| Error::ClientProtocol("missing Host header".to_string()))?;
        Ok(format!("http://{host}{}", self.target))
    }
}

/// Read bytes from `stream` until a full request head (terminated by
/// `\r\n\r\n`) has been buffered, bounded by `MAX_HEAD_SIZE`.
async fn read_head_bytes(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);
    let mut tmp = [0u8; 4096];
    loop {
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(Error::ClientProtocol(
                "client closed connection before sending a complete request head".to_string(),
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(Error::ClientProtocol("request head too large".to_string()));
        }
    }
    Ok(buf)
}

/// Read and parse one request head from the client.
pub async fn read_request_head(stream: &mut TcpStream) -> Result<RequestHead> {
    let buf = read_head_bytes(stream).await?;

    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut raw_headers);
    req.parse(&buf)?;

    let method = req
        .method
        .ok_or_else(|| Error::ClientProtocol("missing method".to_string()))?
        .to_string();
    let target = req
        .path
        .ok_or_else(|| Error::ClientProtocol("missing request target".to_string()))?
        .to_string();
    let version = req
        .version
        .ok_or_else(|| Error::ClientProtocol("missing HTTP version".to_string()))?;

    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Send a bare status-line-only response (no body), used for early
/// terminations such as a malformed request head.
pub async fn write_status_only(stream: &mut TcpStream, status: u16, reason: &str) -> Result<()> {
    let line = format!("HTTP/1.1 {status} {reason}\r\nConnection: close\r\n\r\n");
    stream.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Send a status line, a plain-text body, and the headers needed to frame it.
pub async fn write_error_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reason_phrase(status),
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        407 => "Proxy Authentication Required",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}
