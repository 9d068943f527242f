use futures::stream::StreamExt;
use samod::DocHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a watcher's `on_change` loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStopReason {
    /// `stop()` was called.
    Stopped,
    /// The underlying document's change stream closed (e.g. the document was dropped).
    Unavailable,
}

/// A watcher for document changes in the VFS.
///
/// Cheap to clone: clones share the same `stopped` flag and underlying document
/// handle, so a caller can hand one clone to `on_change` (e.g. inside a spawned
/// task) while keeping another to call `stop()` on later.
#[derive(Clone)]
pub struct DocumentWatcher {
    handle: DocHandle,
    stopped: Arc<AtomicBool>,
}

impl DocumentWatcher {
    /// Create a new document watcher
    pub fn new(handle: DocHandle) -> Self {
        Self {
            handle,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the document handle
    pub fn handle(&self) -> &DocHandle {
        &self.handle
    }

    /// Get the document ID being watched
    pub fn document_id(&self) -> samod::DocumentId {
        self.handle.document_id().clone()
    }

    /// Stop watching. Idempotent and synchronous; guarantees no further callback
    /// invocations from this watcher after it returns.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Watch for changes and call the callback for each change.
    ///
    /// Runs until `stop()` is called or the underlying change stream closes.
    pub async fn on_change<F>(&self, mut callback: F) -> WatcherStopReason
    where
        F: FnMut(&mut automerge::Automerge) + Send,
    {
        let mut changes = self.handle.changes();
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return WatcherStopReason::Stopped;
            }

            match changes.next().await {
                Some(_) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return WatcherStopReason::Stopped;
                    }
                    self.handle.with_document(|doc| callback(doc));
                }
                None => return WatcherStopReason::Unavailable,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use automerge::{transaction::Transactable, AutomergeError, ReadDoc, ROOT};
    use std::sync::Mutex;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_document_watcher_creation() {
        let engine = Engine::new().await.unwrap();
        let doc = automerge::Automerge::new();
        let handle = engine.create_document(doc).await.unwrap();

        let watcher = DocumentWatcher::new(handle.clone());
        assert_eq!(watcher.document_id(), handle.document_id().clone());
    }

    #[tokio::test]
    async fn test_on_change_callback() {
        let engine = Engine::new().await.unwrap();
        let doc = automerge::Automerge::new();
        let handle = engine.create_document(doc).await.unwrap();

        let watcher = DocumentWatcher::new(handle.clone());
        let received_values = Arc::new(Mutex::new(Vec::new()));

        // Spawn a task to listen for changes
        let listener_task = tokio::spawn({
            let received = received_values.clone();
            async move {
                watcher
                    .on_change(move |doc| {
                        // Get the value from the document
                        if let Ok(Some((automerge::Value::Scalar(v), _))) =
                            doc.get(ROOT, "test_key")
                        {
                            received.lock().unwrap().push(v.to_string());
                        }
                    })
                    .await
            }
        });

        // Give the listener time to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Make a change to the document
        handle.with_document(|doc| {
            doc.transact::<_, _, AutomergeError>(|tx| {
                tx.put(ROOT, "test_key", "test_value")?;
                Ok(())
            })
            .unwrap();
        });

        // Wait a bit for the change to propagate
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Check that we received the change
        let values = received_values.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "\"test_value\"");

        // Clean up
        listener_task.abort();
    }

    #[tokio::test]
    async fn test_multiple_changes() {
        let engine = Engine::new().await.unwrap();
        let doc = automerge::Automerge::new();
        let handle = engine.create_document(doc).await.unwrap();

        let watcher = DocumentWatcher::new(handle.clone());
        let change_count = Arc::new(Mutex::new(0));

        // Spawn the listener
        let listener_task = tokio::spawn({
            let count = change_count.clone();
            async move {
                watcher
                    .on_change(move |_doc| {
                        *count.lock().unwrap() += 1;
                    })
                    .await
            }
        });

        // Give the listener time to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Make multiple changes
        for i in 0..3 {
            handle.with_document(|doc| {
                doc.transact::<_, _, AutomergeError>(|tx| {
                    tx.put(ROOT, format!("key_{i}"), format!("value_{i}"))?;
                    Ok(())
                })
                .unwrap();
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Wait for changes to be processed
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Verify we received all changes
        assert_eq!(*change_count.lock().unwrap(), 3);

        // Clean up
        listener_task.abort();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_halts_callbacks() {
        let engine = Engine::new().await.unwrap();
        let doc = automerge::Automerge::new();
        let handle = engine.create_document(doc).await.unwrap();

        let watcher = DocumentWatcher::new(handle.clone());
        let count = Arc::new(Mutex::new(0));

        let listener_task = tokio::spawn({
            let watcher = watcher.clone();
            let count = count.clone();
            async move {
                watcher
                    .on_change(move |_doc| {
                        *count.lock().unwrap() += 1;
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        // Stop twice; must not panic or double-fire anything.
        watcher.stop();
        watcher.stop();

        let reason = listener_task.await.unwrap();
        assert_eq!(reason, WatcherStopReason::Stopped);
    }
}
