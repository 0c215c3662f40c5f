/*!
 * # Relay Engine
 *
 * Forwards non-`CONNECT` requests upstream via the HTTP client transport
 * (`reqwest`), stripping hop-by-hop headers, optionally injecting `Via`, and
 * optionally teeing the exchange to a capture record.
 */

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;

use crate::capture::{format_request_section, format_response_head, CaptureGuard};
use crate::config::ServerConfig;
use crate::demux::{reason_phrase, write_error_response, RequestHead};
use crate::error::{Error, Result};

/// Headers that are meaningful only between adjacent HTTP participants and
/// must never be forwarded upstream (RFC 7230 §6.1, plus the proxy-specific
/// auth headers).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Read the request body from `stream`, if `Content-Length` says there is
/// one. Chunked request bodies are out of scope (see SPEC_FULL.md §1
/// non-goals on HTTP feature depth); most proxied GET/CONNECT-adjacent
/// traffic carries no body or an explicit length.
async fn read_request_body(stream: &mut TcpStream, req: &RequestHead) -> Result<Vec<u8>> {
    let len: usize = match req.header("content-length") {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::ClientProtocol("invalid Content-Length".to_string()))?,
        None => 0,
    };
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

fn build_via_headers(req: &RequestHead, config: &ServerConfig) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = req
        .headers
        .iter()
        .filter(|(k, _)| !is_hop_by_hop(k))
        .cloned()
        .collect();

    if let Some(via) = &config.via {
        headers.push(("Via".to_string(), via.clone()));
    }

    headers
}

/// Handle one non-`CONNECT` request: forward it upstream and stream the
/// response back to the client, optionally capturing both sides.
pub async fn handle_relay(
    req: RequestHead,
    client: &mut TcpStream,
    config: &ServerConfig,
) -> Result<()> {
    let body = read_request_body(client, &req).await?;
    let target = req.absolute_target()?;
    let forward_headers = build_via_headers(&req, config);

    let capture = if config.sniff {
        let handle = config.capture.open().await?;
        let guard = CaptureGuard::new(config.capture.clone(), handle);
        let section = format_request_section(&req.method, &target, &forward_headers, &body);
        guard.write(&section).await?;
        Some(guard)
    } else {
        None
    };

    let http_client = reqwest::Client::new();
    let method = Method::from_bytes(req.method.as_bytes())
        .map_err(|_| Error::ClientProtocol(format!("invalid method {}", req.method)))?;

    let mut header_map = HeaderMap::new();
    for (name, value) in &forward_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            header_map.append(name, value);
        }
    }

    let result = http_client
        .request(method, &target)
        .headers(header_map)
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            write_error_response(client, 503, &e.to_string()).await?;
            if let Some(guard) = capture {
                guard.close().await?;
            }
            return Err(Error::UpstreamRoundTrip(e));
        }
    };

    let status = response.status();
    let resp_headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    if let Some(guard) = &capture {
        let status_line = format!("HTTP/1.1 {} {}", status.as_u16(), reason_for(status));
        let head = format_response_head(&status_line, &resp_headers);
        guard.write(&head).await?;
    }

    write_response_head(client, status, &resp_headers).await?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "upstream body stream error, truncating response");
                break;
            }
        };
        if client.write_all(&chunk).await.is_err() {
            break;
        }
        if let Some(guard) = &capture {
            let _ = guard.write(&chunk).await;
        }
    }

    if let Some(guard) = capture {
        guard.close().await?;
    }

    Ok(())
}

fn reason_for(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or_else(|| reason_phrase(status.as_u16()))
}

async fn write_response_head(
    client: &mut TcpStream,
    status: StatusCode,
    headers: &[(String, String)],
) -> Result<()> {
    let mut out = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason_for(status));
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    client.write_all(out.as_bytes()).await?;
    Ok(())
}
