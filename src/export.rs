//! Streaming export of rendered documents into object storage.
//!
//! Rendering and uploading run concurrently over a bounded in-memory
//! conduit, so a multi-megabyte document is never materialized in full.
//! The writer side blocks when the conduit is full and the reader side
//! blocks when it is empty; closing the writer is the only EOF signal the
//! uploader ever sees.
//!
//! Outcome resolution is strict: a render failure wins (the upload is
//! aborted and any partial object deleted), an upload failure after a
//! clean render is reported as-is, and success is only reported once the
//! upload has fully drained the stream and committed the object.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Buffer between the render and upload halves. Small enough to keep
/// memory flat, large enough that neither side thrashes on tiny writes.
const CONDUIT_CAPACITY: usize = 64 * 1024;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object size mismatch: expected {expected} bytes, stored {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// Rendering failed; any partially uploaded object has been deleted
    #[error("Render failed: {0}")]
    Render(anyhow::Error),

    /// Rendering succeeded but the upload did not commit
    #[error("Upload failed: {0}")]
    Upload(#[source] StoreError),

    #[error("Upload task panicked")]
    UploadPanicked,
}

// ============================================================================
// Seams
// ============================================================================

/// Object storage sink for exported documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream an object into storage, consuming the reader to EOF. The
    /// size hint, when present, lets backends preallocate or verify.
    async fn save_stream(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size_hint: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Remove an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Produces one document into the writer it is handed.
///
/// The writer is consumed; dropping it on return is what signals EOF to
/// the uploading side, so implementations must not stash it anywhere.
#[async_trait]
pub trait Render: Send + Sync {
    async fn render(&self, out: Box<dyn AsyncWrite + Send + Unpin>) -> anyhow::Result<()>;
}

/// Closures are renderers, which keeps tests and one-off wiring terse.
#[async_trait]
impl<F, Fut> Render for F
where
    F: Fn(Box<dyn AsyncWrite + Send + Unpin>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn render(&self, out: Box<dyn AsyncWrite + Send + Unpin>) -> anyhow::Result<()> {
        (self)(out).await
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Render a document and upload it under `object_key`, concurrently.
pub async fn export(
    renderer: &dyn Render,
    store: Arc<dyn ObjectStore>,
    object_key: &str,
    size_hint: Option<u64>,
) -> Result<(), ExportError> {
    let (writer, reader) = tokio::io::duplex(CONDUIT_CAPACITY);

    let upload = tokio::spawn({
        let store = Arc::clone(&store);
        let key = object_key.to_string();
        async move { store.save_stream(&key, Box::new(reader), size_hint).await }
    });

    match renderer.render(Box::new(writer)).await {
        Err(render_err) => {
            // The render error owns the outcome. The upload may have seen
            // EOF and committed a truncated object already, so delete it
            // unconditionally.
            upload.abort();
            let _ = upload.await;
            if let Err(e) = store.delete(object_key).await {
                tracing::warn!(
                    key = object_key,
                    error = %e,
                    "Failed to delete partial object after render error"
                );
            }
            tracing::warn!(key = object_key, error = %render_err, "Export render failed");
            Err(ExportError::Render(render_err))
        }
        Ok(()) => match upload.await {
            Ok(Ok(())) => {
                tracing::info!(key = object_key, "Export complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(key = object_key, error = %e, "Export upload failed");
                Err(ExportError::Upload(e))
            }
            Err(_) => Err(ExportError::UploadPanicked),
        },
    }
}

// ============================================================================
// Backends
// ============================================================================

/// Filesystem-backed object store.
///
/// Objects are written to a `.part` sibling first and renamed into place,
/// so a crash mid-upload never leaves a readable half-object under the
/// final key.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if key.is_empty() || escapes {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn save_stream(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        size_hint: Option<u64>,
    ) -> Result<(), StoreError> {
        let final_path = self.object_path(key)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let part_path = PathBuf::from(format!("{}.part", final_path.display()));

        let mut file = tokio::fs::File::create(&part_path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = size_hint {
            if written != expected {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(StoreError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        tokio::fs::rename(&part_path, &final_path).await?;
        tracing::debug!(key, bytes = written, "Stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let final_path = self.object_path(key)?;
        let part_path = PathBuf::from(format!("{}.part", final_path.display()));
        for path in [final_path, part_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// In-memory object store for tests and dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn save_stream(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        size_hint: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut buffer = Vec::with_capacity(size_hint.unwrap_or(0) as usize);
        reader.read_to_end(&mut buffer).await?;
        if let Some(expected) = size_hint {
            if buffer.len() as u64 != expected {
                return Err(StoreError::SizeMismatch {
                    expected,
                    actual: buffer.len() as u64,
                });
            }
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), buffer);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Writer = Box<dyn AsyncWrite + Send + Unpin>;

    /// Store wrapper that records which operations ran.
    struct RecordingStore {
        inner: MemoryObjectStore,
        deleted: Mutex<Vec<String>>,
        fail_saves: bool,
    }

    impl RecordingStore {
        fn new(fail_saves: bool) -> Self {
            Self {
                inner: MemoryObjectStore::default(),
                deleted: Mutex::new(Vec::new()),
                fail_saves,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn save_stream(
            &self,
            key: &str,
            mut reader: Box<dyn AsyncRead + Send + Unpin>,
            size_hint: Option<u64>,
        ) -> Result<(), StoreError> {
            if self.fail_saves {
                // Drain first so the render side is never wedged on a full
                // conduit.
                let mut sink = Vec::new();
                reader.read_to_end(&mut sink).await?;
                return Err(StoreError::Io(io::Error::other("bucket unavailable")));
            }
            self.inner.save_stream(key, reader, size_hint).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.deleted.lock().unwrap().push(key.to_string());
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_export_streams_document_into_store() {
        let store = Arc::new(MemoryObjectStore::default());
        let render = |mut out: Writer| async move {
            out.write_all(b"<html>feed export</html>").await?;
            Ok::<_, anyhow::Error>(())
        };

        export(&render, store.clone(), "alice/feed.html", None)
            .await
            .unwrap();

        assert_eq!(
            store.object("alice/feed.html").as_deref(),
            Some(b"<html>feed export</html>".as_slice())
        );
    }

    #[tokio::test]
    async fn test_export_handles_documents_larger_than_the_conduit() {
        let store = Arc::new(MemoryObjectStore::default());
        let render = |mut out: Writer| async move {
            let chunk = vec![0x61u8; 8 * 1024];
            for _ in 0..512 {
                out.write_all(&chunk).await?;
            }
            Ok::<_, anyhow::Error>(())
        };

        export(&render, store.clone(), "big.bin", Some(4 * 1024 * 1024))
            .await
            .unwrap();

        assert_eq!(
            store.object("big.bin").map(|b| b.len()),
            Some(4 * 1024 * 1024)
        );
    }

    #[tokio::test]
    async fn test_render_error_wins_and_deletes_partial_object() {
        let store = Arc::new(RecordingStore::new(false));
        let render = |mut out: Writer| async move {
            out.write_all(b"partial bytes").await?;
            Err::<(), _>(anyhow::anyhow!("template exploded"))
        };

        let err = export(&render, store.clone(), "doomed.html", None)
            .await
            .unwrap_err();

        match err {
            ExportError::Render(e) => assert_eq!(e.to_string(), "template exploded"),
            e => panic!("Expected Render error, got {:?}", e),
        }
        assert_eq!(*store.deleted.lock().unwrap(), vec!["doomed.html"]);
        assert_eq!(store.inner.object("doomed.html"), None);
    }

    #[tokio::test]
    async fn test_upload_error_is_reported_and_nothing_is_deleted() {
        let store = Arc::new(RecordingStore::new(true));
        let render = |mut out: Writer| async move {
            out.write_all(b"rendered fine").await?;
            Ok::<_, anyhow::Error>(())
        };

        let err = export(&render, store.clone(), "unlucky.html", None)
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::Upload(_)));
        assert!(store.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_hint_mismatch_fails_the_upload() {
        let store = Arc::new(MemoryObjectStore::default());
        let render = |mut out: Writer| async move {
            out.write_all(b"short").await?;
            Ok::<_, anyhow::Error>(())
        };

        let err = export(&render, store.clone(), "sized.bin", Some(100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExportError::Upload(StoreError::SizeMismatch {
                expected: 100,
                actual: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_local_store_commits_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        let render = |mut out: Writer| async move {
            out.write_all(b"on disk").await?;
            Ok::<_, anyhow::Error>(())
        };

        export(&render, store.clone(), "nested/feed.xml", None)
            .await
            .unwrap();

        let final_path = dir.path().join("nested/feed.xml");
        assert_eq!(std::fs::read(&final_path).unwrap(), b"on disk");
        assert!(!dir.path().join("nested/feed.xml.part").exists());

        store.delete("nested/feed.xml").await.unwrap();
        assert!(!final_path.exists());
        // Idempotent.
        store.delete("nested/feed.xml").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let result = store
            .save_stream("../outside", Box::new(tokio::io::empty()), None)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }
}
