//! Integration tests for the export path: generated content streamed
//! through the pipeline into the filesystem-backed object store.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use feedmill::coordinator::{Coordinator, CoordinatorConfig};
use feedmill::export::{export, ExportError, LocalObjectStore, ObjectStore};
use feedmill::key::ResourceKey;
use feedmill::storage::MemoryCache;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// Local Store End-to-End
// ============================================================================

#[tokio::test]
async fn test_export_commits_document_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));

    let render = |mut out: Writer| async move {
        out.write_all(b"<html>rendered export</html>").await?;
        Ok::<_, anyhow::Error>(())
    };
    export(&render, store, "alice/topics.html", None)
        .await
        .unwrap();

    let written = std::fs::read(dir.path().join("alice/topics.html")).unwrap();
    assert_eq!(written, b"<html>rendered export</html>");
}

#[tokio::test]
async fn test_failed_render_leaves_no_object_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));

    let render = |mut out: Writer| async move {
        out.write_all(b"half a document").await?;
        Err::<(), _>(anyhow::anyhow!("renderer crashed"))
    };
    let err = export(&render, store, "broken.html", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::Render(_)));

    assert!(!dir.path().join("broken.html").exists());
    assert!(!dir.path().join("broken.html.part").exists());
}

// ============================================================================
// Coordinator-Fed Export
// ============================================================================

/// Full chain: the coordinator produces (and caches) the document, the
/// pipeline streams it into the store.
#[tokio::test]
async fn test_export_of_coordinator_generated_content() {
    let generator = |key: ResourceKey| async move {
        Ok::<_, anyhow::Error>(format!("<rss>{key}</rss>"))
    };
    let coordinator = Arc::new(Coordinator::spawn(
        Arc::new(MemoryCache::default()),
        Arc::new(generator),
        CoordinatorConfig {
            ttl: Duration::from_secs(3600),
            queue_capacity: 16,
        },
    ));

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));

    let key = ResourceKey::new("forum", "topic", "42").unwrap();
    let render = {
        let coordinator = coordinator.clone();
        let key = key.clone();
        move |mut out: Writer| {
            let coordinator = coordinator.clone();
            let key = key.clone();
            async move {
                let content = coordinator.get(key).await?;
                out.write_all(content.as_bytes()).await?;
                Ok::<_, anyhow::Error>(())
            }
        }
    };

    export(&render, store, "forum/topic-42.xml", None)
        .await
        .unwrap();

    let written = std::fs::read(dir.path().join("forum/topic-42.xml")).unwrap();
    assert_eq!(written, b"<rss>forum:topic:42</rss>");
}
