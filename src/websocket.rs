use crate::error::{Result, VfsError};
use rand::Rng;
use samod::{ConnDirection, ConnFinishedReason, Repo};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Connect to a WebSocket peer once and drive the sync connection to completion.
pub async fn connect(samod: Arc<Repo>, url: &str) -> Result<ConnFinishedReason> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| VfsError::WebSocketError(format!("Failed to connect to {url}: {e}")))?;

    Ok(samod
        .connect_tungstenite(ws_stream, ConnDirection::Outgoing)
        .await)
}

/// Connect to a WebSocket peer, reconnecting with exponential backoff (base 1s, cap 30s,
/// ±20% jitter) whenever the connection finishes. Runs until `stop` is set.
pub async fn connect_with_reconnect(samod: Arc<Repo>, url: &str, stop: Arc<AtomicBool>) {
    let mut backoff = BACKOFF_BASE;

    while !stop.load(Ordering::SeqCst) {
        match connect(Arc::clone(&samod), url).await {
            Ok(reason) => {
                info!("connection to {url} finished: {reason:?}");
                backoff = BACKOFF_BASE;
            }
            Err(e) => {
                warn!("connection attempt to {url} failed: {e}");
            }
        }

        if stop.load(Ordering::SeqCst) {
            break;
        }

        let jitter = {
            let mut rng = rand::rng();
            rng.random_range(-0.2..=0.2)
        };
        let wait = backoff.mul_f64(1.0 + jitter).min(BACKOFF_CAP);
        debug!("reconnecting to {url} in {:?}", wait);
        tokio::time::sleep(wait).await;

        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
}

/// Accept-side WebSocket transport: binds a listener and drives every incoming
/// connection into the given repository as a sync peer.
pub struct WebSocketServer {
    repo: Arc<Repo>,
    listener: TcpListener,
}

impl WebSocketServer {
    pub async fn bind(repo: Arc<Repo>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| VfsError::WebSocketError(format!("Failed to bind to {addr}: {e}")))?;

        info!("WebSocket server listening on {}", listener.local_addr().ok().unwrap_or(addr));

        Ok(Self { repo, listener })
    }

    /// The address the server actually bound to (useful when `addr`'s port was 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(VfsError::IoError)
    }

    /// Accept connections until the listener is dropped. Each connection is handled on
    /// its own task, so `run` only returns if `accept()` itself errors.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let repo = Arc::clone(&self.repo);
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                let reason = repo
                                    .connect_tungstenite(ws_stream, ConnDirection::Incoming)
                                    .await;
                                debug!("connection from {addr} finished: {reason:?}");
                            }
                            Err(e) => {
                                warn!("failed to accept WebSocket from {addr}: {e}");
                            }
                        }
                    });
                }
                Err(e) => {
                    return Err(VfsError::WebSocketError(format!(
                        "Failed to accept connection: {e}"
                    )));
                }
            }
        }
    }

    /// Accept a single incoming connection and drive it to completion. Used by the
    /// two-peer in-process sync test harness, where each test wants one connection.
    pub async fn accept_one(&self) -> Result<ConnFinishedReason> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| VfsError::WebSocketError(format!("Failed to accept connection: {e}")))?;

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| VfsError::WebSocketError(format!("Failed to accept WebSocket: {e}")))?;

        debug!("accepted connection from {addr}");

        Ok(self
            .repo
            .connect_tungstenite(ws_stream, ConnDirection::Incoming)
            .await)
    }
}
