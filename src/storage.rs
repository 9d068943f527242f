use crate::bundle::{Bundle, BundlePath, RandomAccess};
use crate::util::CloneableFile;
use samod::storage::{Storage, StorageKey};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage adapter that uses Bundle for persistence instead of filesystem.
///
/// BundleStorage implements the samod Storage trait, allowing Bundle instances
/// to be used as the persistence layer for CRDT synchronization. This enables
/// storing document data in ZIP archives instead of traditional filesystems.
///
/// # Type Parameters
/// * `R` - The RandomAccess type used by the underlying Bundle
///
/// # Examples
///
/// ```no_run
/// # use loomfs::storage::BundleStorage;
/// # use std::io::Cursor;
/// let data = vec![/* ZIP data */];
/// let storage = BundleStorage::from_bytes(data).unwrap();
/// ```
#[derive(Debug)]
pub struct BundleStorage<R: RandomAccess> {
    bundle: Arc<Mutex<Bundle<R>>>,
}

impl<R: RandomAccess> BundleStorage<R> {
    /// Create a new BundleStorage from an existing Bundle.
    ///
    /// # Arguments
    /// * `bundle` - The Bundle instance to wrap
    ///
    /// # Returns
    /// A new BundleStorage instance that can be used with samod
    pub fn new(bundle: Bundle<R>) -> Self {
        Self {
            bundle: Arc::new(Mutex::new(bundle)),
        }
    }
}

impl<R: RandomAccess> Clone for BundleStorage<R> {
    fn clone(&self) -> Self {
        Self {
            bundle: Arc::clone(&self.bundle),
        }
    }
}

// Convenience constructors for common bundle types
impl BundleStorage<std::io::Cursor<Vec<u8>>> {
    /// Create a new BundleStorage from a byte array (in-memory bundle)
    pub fn from_bytes(data: Vec<u8>) -> anyhow::Result<Self> {
        let bundle = Bundle::from_bytes(data)?;
        Ok(Self::new(bundle))
    }
}

impl BundleStorage<CloneableFile> {
    /// Create a new BundleStorage from a file path (for large files with seeking)
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let cloneable_file =
            CloneableFile::new(path).map_err(|e| anyhow::anyhow!("Failed to open file: {}", e))?;
        let bundle = Bundle::from_stream(cloneable_file)?;
        Ok(Self::new(bundle))
    }
}

impl<R: RandomAccess + 'static> Storage for BundleStorage<R> {
    fn load(&self, key: StorageKey) -> impl std::future::Future<Output = Option<Vec<u8>>> + Send {
        let bundle = Arc::clone(&self.bundle);
        async move {
            let mut bundle_guard = bundle.lock().await;

            // Convert StorageKey to BundlePath for bundle
            let bundle_key = BundlePath::from(key.into_iter().collect::<Vec<String>>());

            bundle_guard.get(&bundle_key).unwrap_or_default()
        }
    }

    fn load_range(
        &self,
        prefix: StorageKey,
    ) -> impl std::future::Future<Output = HashMap<StorageKey, Vec<u8>>> + Send {
        let bundle = Arc::clone(&self.bundle);
        async move {
            let mut bundle_guard = bundle.lock().await;
            let mut result = HashMap::new();

            // Convert StorageKey to BundlePath for bundle prefix
            let bundle_prefix = BundlePath::from(prefix.into_iter().collect::<Vec<String>>());

            if let Ok(entries) = bundle_guard.prefix(&bundle_prefix) {
                for (key_path, data) in entries {
                    // Convert back to StorageKey
                    let storage_key: StorageKey = StorageKey::from_parts(key_path.components())
                        .expect("Failed to create StorageKey from BundlePath");
                    result.insert(storage_key, data);
                }
            }

            result
        }
    }

    fn put(&self, key: StorageKey, data: Vec<u8>) -> impl std::future::Future<Output = ()> + Send {
        let bundle = Arc::clone(&self.bundle);
        async move {
            let mut bundle_guard = bundle.lock().await;

            // Convert StorageKey to BundlePath for bundle
            let bundle_key = BundlePath::from(key.into_iter().collect::<Vec<String>>());

            // Ignore errors for now - in a real implementation you might want to handle them
            let _ = bundle_guard.put(&bundle_key, data);
        }
    }

    async fn delete(&self, key: StorageKey) {
        let bundle = Arc::clone(&self.bundle);
        let bundle_key = BundlePath::from(key.into_iter().collect::<Vec<String>>());

        let mut bundle_guard = bundle.lock().await;

        // Call the delete method on the bundle
        if let Err(e) = bundle_guard.delete(&bundle_key) {
            // Log the error but don't propagate it since the trait method doesn't return Result
            tracing::warn!("Failed to delete key: {}", e);
        }
    }
}
