//! TCP reactor: accepts connections, frames them as newline-delimited
//! JSON, and drives the periodic background sweeps the rest of the
//! crate depends on (session expiry, challenge expiry, clock timeouts,
//! matchmaking).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, instrument, warn};

use crate::core::Core;
use crate::dispatch::dispatch;
use crate::presence::ConnectionId;
use crate::protocol::{InboundEnvelope, Notification, ResponseEnvelope};

/// Server-level failures, distinct from per-request `CoreError`s.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not bind its configured address.
    #[error("failed to bind listener: {0}")]
    BindFailed(#[source] std::io::Error),
}

/// Owns the listener and the handles to every background sweep task.
pub struct Server {
    core: Arc<Core>,
    shutdown_tx: broadcast::Sender<()>,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Build a server around an already-constructed `Core`.
    pub fn new(core: Arc<Core>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            core,
            shutdown_tx,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// A handle that, when sent `()`, tells `run` to stop accepting new
    /// connections and every live connection task to close.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind and serve until a shutdown signal arrives.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.core.config.bind_addr)
            .await
            .map_err(ServerError::BindFailed)?;
        info!(addr = %self.core.config.bind_addr, "listening");

        let session_sweep = spawn_session_sweep(self.core.clone(), self.shutdown_tx.subscribe());
        let challenge_sweep = spawn_challenge_sweep(self.core.clone(), self.shutdown_tx.subscribe());
        let clock_sweep = spawn_clock_sweep(self.core.clone(), self.shutdown_tx.subscribe());
        let matchmaking_tick = spawn_matchmaking_tick(self.core.clone(), self.shutdown_tx.subscribe());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                            debug!(%addr, conn_id, "accepted connection");
                            spawn_connection(self.core.clone(), conn_id, stream, self.shutdown_tx.subscribe());
                        }
                        Err(err) => error!(error = %err, "accept failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        session_sweep.abort();
        challenge_sweep.abort();
        clock_sweep.abort();
        matchmaking_tick.abort();
        Ok(())
    }
}

fn spawn_connection(
    core: Arc<Core>,
    conn_id: ConnectionId,
    stream: TcpStream,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let max_frame_bytes = core.config.max_frame_bytes;
        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(max_frame_bytes));
        let (out_tx, mut out_rx) = mpsc::channel::<Notification>(64);
        core.presence.register_connection(conn_id, out_tx).await;

        loop {
            tokio::select! {
                line = framed.next() => {
                    match line {
                        Some(Ok(line)) => {
                            let response = handle_line(&core, conn_id, &line).await;
                            if let Ok(text) = serde_json::to_string(&response) {
                                if framed.send(text).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            warn!(conn_id, "frame exceeded maximum size, closing connection");
                            break;
                        }
                        Some(Err(err)) => {
                            debug!(conn_id, error = %err, "connection read error");
                            break;
                        }
                        None => break,
                    }
                }
                notification = out_rx.recv() => {
                    match notification {
                        Some(notification) => {
                            if let Ok(text) = serde_json::to_string(&notification) {
                                if framed.send(text).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        core.presence.remove_connection(conn_id).await;
    });
}

async fn handle_line(core: &Core, conn_id: ConnectionId, line: &str) -> ResponseEnvelope {
    let envelope: InboundEnvelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(_) => return ResponseEnvelope::error(0, "malformed request"),
    };
    dispatch(core, conn_id, envelope).await
}

fn spawn_session_sweep(core: Arc<Core>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    let sweep_interval = core.config.session.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = core.sessions.sweep().await;
                    if removed > 0 {
                        debug!(removed, "swept expired sessions");
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_challenge_sweep(core: Arc<Core>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    let sweep_interval = core.config.lobby.challenge_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => core.sweep_challenges().await,
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

fn spawn_clock_sweep(core: Arc<Core>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    let sweep_interval = core.config.match_manager.clock_sweep_interval;
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => core.sweep_match_clocks().await,
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

/// Periodically retries both matchmaking algorithms, so entries that
/// didn't pair immediately on `find_match` still get matched once a
/// compatible partner joins later.
fn spawn_matchmaking_tick(core: Arc<Core>, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    core.run_matchmaking_pass(false).await;
                    core.run_matchmaking_pass(true).await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::repo::InMemoryRepository;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_core(port: u16) -> Arc<Core> {
        let mut config = ServerConfig::default();
        config.bind_addr = SocketAddr::from(([127, 0, 0, 1], port));
        Arc::new(Core::new(config, Arc::new(InMemoryRepository::new())))
    }

    #[tokio::test]
    async fn register_and_heartbeat_round_trip_over_tcp() {
        let core = test_core(17891);
        let server = Server::new(core.clone());
        let addr = core.config.bind_addr;
        let shutdown = server.shutdown_handle();

        let handle = tokio::spawn(async move {
            server.run().await.unwrap();
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = b"{\"type\":\"register\",\"seq\":1,\"payload\":{\"username\":\"carol\",\"password_hash\":\"h\"}}\n";
        stream.write_all(request).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        let response: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(response["success"], true);

        let _ = shutdown.send(());
        handle.abort();
    }
}
