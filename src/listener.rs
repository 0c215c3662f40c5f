/*!
 * # Listener
 *
 * Accepts connections on the configured address and spawns one session task
 * per connection. Tracks live sessions so `stop()` can wait for them to
 * drain instead of severing them mid-flight.
 */

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::handle_session;

/// Owns the bound socket and the bookkeeping needed for a graceful shutdown:
/// a flag guarding idempotent `stop()` calls, a `Notify` that unblocks the
/// accept loop, and a count of in-flight sessions that `stop()` waits to
/// reach zero before returning.
pub struct Listener {
    listener: TcpListener,
    config: ServerConfig,
    shutting_down: Arc<AtomicBool>,
    shutdown_signal: Arc<Notify>,
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl Listener {
    /// Bind the configured address. Does not start accepting yet.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        tracing::info!(addr = %config.listen_addr, "proxy listener bound");
        Ok(Listener {
            listener,
            config,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_signal: Arc::new(Notify::new()),
            active: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        })
    }

    /// The address actually bound, useful when `ServerConfig::listen_addr`
    /// used an ephemeral port (`:0`).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can be used to trigger shutdown from another task.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            shutting_down: self.shutting_down.clone(),
            shutdown_signal: self.shutdown_signal.clone(),
        }
    }

    /// Accept connections until shutdown is requested, spawning one session
    /// task per connection. Each session increments `active` on spawn and
    /// decrements it on completion, notifying `drained` when it hits zero.
    /// Returns once the accept loop has exited and every in-flight session
    /// has completed.
    pub async fn run(self) {
        while !self.shutting_down.load(Ordering::Acquire) {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(peer = %peer, "accepted connection");
                    self.spawn_session(stream);
                }
                _ = self.shutdown_signal.notified() => {
                    tracing::info!("shutdown requested, accept loop exiting");
                    break;
                }
            }
        }

        self.drain().await;
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream) {
        let config = self.config.clone();
        let active = self.active.clone();
        let drained = self.drained.clone();
        active.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            handle_session(stream, config).await;
            if active.fetch_sub(1, Ordering::AcqRel) == 1 {
                // `notify_one` stores a permit if `drain()` hasn't started
                // waiting yet, closing the check-then-wait race between the
                // `active` load and the `notified()` call below.
                drained.notify_one();
            }
        });
    }

    async fn drain(&self) {
        while self.active.load(Ordering::Acquire) > 0 {
            self.drained.notified().await;
        }
        tracing::info!("proxy listener drained, all sessions complete");
    }
}

/// A cloneable handle used to request shutdown of a running `Listener`.
#[derive(Clone)]
pub struct ListenerHandle {
    shutting_down: Arc<AtomicBool>,
    shutdown_signal: Arc<Notify>,
}

impl ListenerHandle {
    /// Request that the listener stop accepting new connections. Idempotent:
    /// a second call is a no-op. Existing sessions are left to finish;
    /// `Listener::run` returns once they have.
    pub fn stop(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // `notify_one` (not `notify_waiters`) stores a permit when no task is
        // waiting yet, so a `stop()` that races ahead of `run()`'s first
        // `select!` iteration is not lost.
        self.shutdown_signal.notify_one();
    }
}
