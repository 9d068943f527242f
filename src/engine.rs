use crate::bundle::{Bundle, BundleConfig};
use crate::error::{Result, VfsError};
use crate::vfs::VirtualFileSystem;
use crate::websocket;
use rand::rng;
use samod::storage::TokioFilesystemStorage as FilesystemStorage;
use samod::{ConnFinishedReason, DocHandle, DocumentId, PeerId, Repo, RepoBuilder};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tracing::info;

/// Lifecycle state of the sync engine's network connectivity.
///
/// A freshly built engine is always usable for local reads and writes regardless of
/// this state — it only tracks whether the engine has an active peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadinessState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
}

impl From<u8> for ReadinessState {
    fn from(value: u8) -> Self {
        match value {
            1 => ReadinessState::Initializing,
            2 => ReadinessState::Ready,
            _ => ReadinessState::Uninitialized,
        }
    }
}

/// Builder for [`Engine`], following the teacher's `RepoBuilder` pattern:
/// configure peer identity and storage backend, then `.build()`.
pub struct EngineBuilder {
    peer_id: Option<PeerId>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { peer_id: None }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub async fn build(self) -> Result<Engine> {
        let peer_id = self.peer_id.unwrap_or_else(random_peer_id);
        Engine::with_peer_id(peer_id).await
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn random_peer_id() -> PeerId {
    let mut rng = rng();
    PeerId::new_with_rng(&mut rng)
}

/// The sync engine: binds a CRDT repository, its storage, and the VFS facade into one
/// handle, plus the readiness protocol that governs network connectivity.
pub struct Engine {
    samod: Arc<Repo>,
    vfs: Arc<VirtualFileSystem>,
    _temp_dir: Option<TempDir>,
    readiness: Arc<AtomicU8>,
    readiness_tx: watch::Sender<ReadinessState>,
}

impl Engine {
    /// Build an engine with a randomly generated peer id and local filesystem-backed
    /// storage in a temporary directory.
    pub async fn new() -> Result<Self> {
        Self::with_peer_id(random_peer_id()).await
    }

    /// Build an engine with a specific peer id.
    pub async fn with_peer_id(peer_id: PeerId) -> Result<Self> {
        let temp_dir = TempDir::new().map_err(VfsError::IoError)?;
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).map_err(VfsError::IoError)?;
        let storage = FilesystemStorage::new(&storage_path);

        let runtime = tokio::runtime::Handle::current();
        let samod = RepoBuilder::new(runtime)
            .with_storage(storage)
            .with_peer_id(peer_id)
            .with_threadpool(None)
            .load()
            .await;
        let samod = Arc::new(samod);

        let vfs = Arc::new(VirtualFileSystem::new(samod.clone()).await?);

        info!("engine initialized with peer id: {}", samod.peer_id());

        Ok(Self::assemble(samod, vfs, Some(temp_dir)))
    }

    /// Load an engine's state from a bundle. The engine is immediately usable: no
    /// network connection is required since the bundle already carries the full
    /// document graph.
    pub async fn from_bundle(mut bundle: Bundle<std::io::Cursor<Vec<u8>>>) -> Result<Self> {
        use crate::BundlePath;

        let temp_dir = TempDir::new().map_err(VfsError::IoError)?;
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).map_err(VfsError::IoError)?;

        let storage_prefix = BundlePath::from("storage");
        let storage_entries = bundle
            .prefix(&storage_prefix)
            .map_err(VfsError::Other)?;

        for (bundle_path, data) in storage_entries {
            let path_str = bundle_path.to_string();
            if let Some(relative_path) = path_str.strip_prefix("storage/") {
                let full_path = storage_path.join(relative_path);
                if let Some(parent) = full_path.parent() {
                    std::fs::create_dir_all(parent).map_err(VfsError::IoError)?;
                }
                std::fs::write(&full_path, data).map_err(VfsError::IoError)?;
            }
        }

        let storage = FilesystemStorage::new(&storage_path);
        let runtime = tokio::runtime::Handle::current();
        let samod = RepoBuilder::new(runtime)
            .with_storage(storage)
            .with_peer_id(random_peer_id())
            .with_threadpool(None)
            .load()
            .await;
        let samod = Arc::new(samod);

        let vfs = Arc::new(VirtualFileSystem::from_bundle(samod.clone(), &mut bundle).await?);

        info!("engine loaded from bundle with peer id: {}", samod.peer_id());

        Ok(Self::assemble(samod, vfs, Some(temp_dir)))
    }

    pub async fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let bundle = Bundle::from_bytes(data)?;
        Self::from_bundle(bundle).await
    }

    pub async fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path).map_err(VfsError::IoError)?;
        Self::from_bytes(data).await
    }

    fn assemble(samod: Arc<Repo>, vfs: Arc<VirtualFileSystem>, temp_dir: Option<TempDir>) -> Self {
        // A freshly built engine is always fully usable locally; readiness tracks
        // network connectivity, which hasn't been attempted yet.
        let (readiness_tx, _) = watch::channel(ReadinessState::Uninitialized);
        Self {
            samod,
            vfs,
            _temp_dir: temp_dir,
            readiness: Arc::new(AtomicU8::new(ReadinessState::Uninitialized as u8)),
            readiness_tx,
        }
    }

    fn set_readiness(&self, state: ReadinessState) {
        self.readiness.store(state as u8, Ordering::SeqCst);
        let _ = self.readiness_tx.send(state);
    }

    /// Current network-readiness state.
    pub fn readiness(&self) -> ReadinessState {
        ReadinessState::from(self.readiness.load(Ordering::SeqCst))
    }

    /// Check readiness without waiting; errors with `NotReady` if not yet ready.
    pub fn try_when_ready(&self) -> Result<()> {
        if self.readiness() == ReadinessState::Ready {
            Ok(())
        } else {
            Err(VfsError::NotReady)
        }
    }

    /// Wait until the engine reaches `Ready`, or until `timeout` elapses.
    pub async fn when_ready(&self, timeout: Duration) -> Result<()> {
        if self.readiness() == ReadinessState::Ready {
            return Ok(());
        }

        let mut rx = self.readiness_tx.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if *rx.borrow() == ReadinessState::Ready {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| VfsError::Timeout)?;

        if self.readiness() == ReadinessState::Ready {
            Ok(())
        } else {
            Err(VfsError::Timeout)
        }
    }

    /// Get access to the VFS layer.
    pub fn vfs(&self) -> Arc<VirtualFileSystem> {
        Arc::clone(&self.vfs)
    }

    /// Get access to the underlying repository.
    pub fn samod(&self) -> Arc<Repo> {
        Arc::clone(&self.samod)
    }

    pub fn peer_id(&self) -> PeerId {
        self.samod.peer_id()
    }

    /// Export the current state to a bundle as bytes.
    pub async fn to_bytes(&self, config: Option<BundleConfig>) -> Result<Vec<u8>> {
        self.vfs.to_bytes(config).await
    }

    /// Export a slim bundle (only the root document's own storage shard).
    pub async fn to_bytes_slim(&self, config: Option<BundleConfig>) -> Result<Vec<u8>> {
        self.vfs.to_bytes_slim(config).await
    }

    pub async fn to_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        config: Option<BundleConfig>,
    ) -> Result<()> {
        let bytes = self.to_bytes(config).await?;
        std::fs::write(path, bytes).map_err(VfsError::IoError)?;
        Ok(())
    }

    /// Connect to a WebSocket peer. On success, transitions readiness to `Ready`; on
    /// failure, reverts to `Uninitialized` so the caller can retry.
    pub async fn connect_websocket(&self, url: &str) -> Result<ConnFinishedReason> {
        info!("connecting to peer at {url}");
        self.set_readiness(ReadinessState::Initializing);

        match websocket::connect(Arc::clone(&self.samod), url).await {
            Ok(reason) => {
                self.set_readiness(ReadinessState::Ready);
                info!("connection to {url} finished with reason: {reason:?}");
                Ok(reason)
            }
            Err(e) => {
                self.set_readiness(ReadinessState::Uninitialized);
                Err(e)
            }
        }
    }

    /// Connect to a WebSocket peer, reconnecting in the background with exponential
    /// backoff whenever the connection drops. Returns a handle whose `drop` (via
    /// `stop()`) ends the reconnect loop.
    pub fn connect_websocket_with_reconnect(&self, url: &str) -> ReconnectHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let samod = Arc::clone(&self.samod);
        let url = url.to_string();
        let stop_clone = Arc::clone(&stop);

        let task = tokio::spawn(async move {
            websocket::connect_with_reconnect(samod, &url, stop_clone).await;
        });

        ReconnectHandle { stop, task }
    }

    pub async fn find_document(&self, doc_id: DocumentId) -> Result<DocHandle> {
        self.samod
            .find(doc_id.clone())
            .await
            .map_err(|e| VfsError::SamodError(format!("Failed to find document {doc_id}: {e}")))?
            .ok_or_else(|| VfsError::SamodError(format!("Document {doc_id} not found")))
    }

    pub async fn create_document(&self, initial_doc: automerge::Automerge) -> Result<DocHandle> {
        self.samod
            .create(initial_doc)
            .await
            .map_err(|e| VfsError::SamodError(format!("Failed to create document: {e}")))
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            samod: Arc::clone(&self.samod),
            vfs: Arc::clone(&self.vfs),
            _temp_dir: None,
            readiness: Arc::clone(&self.readiness),
            readiness_tx: self.readiness_tx.clone(),
        }
    }
}

/// Handle to a background reconnect loop started by `connect_websocket_with_reconnect`.
pub struct ReconnectHandle {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconnectHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for ReconnectHandle {
    fn drop(&mut self) {
        self.stop();
        self.task.abort();
    }
}
