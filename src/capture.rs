/*!
 * # Capture Sink
 *
 * Persists plaintext request/response pairs (relay path) or raw bidirectional
 * tunnel bytes (interception path) to disk, one file per captured exchange,
 * named by a time-ordered unique identifier.
 *
 * When capture is disabled, [`NullSink`] stands in for [`FileCaptureSink`] so
 * the tee path in the relay and tunnel engines never has to branch on whether
 * capture is active.
 */

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A sink capable of persisting capture records.
///
/// Implementations must be safe for concurrent `open` calls; the returned
/// handle is owned by a single session and is not `Send`-shared further.
#[async_trait::async_trait]
pub trait CaptureSink: Send + Sync {
    /// Allocate a new record and return a handle to it.
    async fn open(&self) -> Result<RecordHandle>;

    /// Append raw bytes to an open record (used by the tunnel engine, which
    /// does not distinguish request/response sections).
    async fn write(&self, handle: &RecordHandle, bytes: &[u8]) -> Result<()>;

    /// Flush and close a record. Safe to call more than once.
    async fn close(&self, handle: &RecordHandle) -> Result<()>;
}

/// A live capture record. Dropping this without calling `CaptureSink::close`
/// is tolerated (a partial record is better than blocking the session) but
/// every normal exit path should close explicitly via [`CaptureGuard`].
#[derive(Debug, Clone)]
pub struct RecordHandle {
    pub id: Uuid,
}

impl RecordHandle {
    fn new() -> Self {
        RecordHandle { id: Uuid::now_v7() }
    }
}

/// RAII guard that closes its record when dropped, guaranteeing every `open`
/// is paired with a `close` on every exit path of the owning session.
pub struct CaptureGuard {
    sink: Arc<dyn CaptureSink>,
    handle: RecordHandle,
    closed: bool,
}

impl CaptureGuard {
    pub fn new(sink: Arc<dyn CaptureSink>, handle: RecordHandle) -> Self {
        CaptureGuard {
            sink,
            handle,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.sink.write(&self.handle, bytes).await
    }

    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        self.sink.close(&self.handle).await
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.closed {
            let sink = self.sink.clone();
            let handle = self.handle.clone();
            tokio::spawn(async move {
                let _ = sink.close(&handle).await;
            });
        }
    }
}

/// Write the request section of a relay capture record: request line,
/// headers (hop-by-hop already stripped by the caller), a blank line, then
/// the body.
pub fn format_request_section(
    method: &str,
    target: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{method} {target}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// Write the response section of a relay capture record: status line,
/// headers, a blank line. The body is appended separately as it streams in.
pub fn format_response_head(status_line: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{status_line}\r\n").as_bytes());
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// File-backed capture sink. One file per record, named by the record's
/// UUID, written under `dir`.
pub struct FileCaptureSink {
    dir: PathBuf,
    files: Mutex<std::collections::HashMap<Uuid, Arc<Mutex<BufWriter<File>>>>>,
}

impl FileCaptureSink {
    pub fn new(dir: PathBuf) -> Self {
        FileCaptureSink {
            dir,
            files: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl CaptureSink for FileCaptureSink {
    async fn open(&self) -> Result<RecordHandle> {
        let handle = RecordHandle::new();
        let path = self.dir.join(handle.id.to_string());
        let file = File::create(&path).await.map_err(Error::CaptureIo)?;
        let mut files = self.files.lock().await;
        files.insert(handle.id, Arc::new(Mutex::new(BufWriter::new(file))));
        Ok(handle)
    }

    async fn write(&self, handle: &RecordHandle, bytes: &[u8]) -> Result<()> {
        let writer = {
            let files = self.files.lock().await;
            files.get(&handle.id).cloned()
        };
        if let Some(writer) = writer {
            let mut writer = writer.lock().await;
            writer.write_all(bytes).await.map_err(Error::CaptureIo)?;
        }
        Ok(())
    }

    async fn close(&self, handle: &RecordHandle) -> Result<()> {
        let writer = {
            let mut files = self.files.lock().await;
            files.remove(&handle.id)
        };
        if let Some(writer) = writer {
            let mut writer = writer.lock().await;
            writer.flush().await.map_err(Error::CaptureIo)?;
        }
        Ok(())
    }
}

/// Discard sink used when capture is disabled.
pub struct NullSink;

#[async_trait::async_trait]
impl CaptureSink for NullSink {
    async fn open(&self) -> Result<RecordHandle> {
        Ok(RecordHandle::new())
    }

    async fn write(&self, _handle: &RecordHandle, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _handle: &RecordHandle) -> Result<()> {
        Ok(())
    }
}
