//! Serialized cache-population actor.
//!
//! One coordinator serves one resource family. Callers rendezvous with a
//! single worker over a bounded queue: the worker answers each request from
//! the cache, or invokes the family's generator exactly once and caches the
//! result before replying. Because there is only one worker and it drives
//! generation synchronously, two generations never overlap and requests are
//! answered strictly in arrival order — deliberately trading parallelism
//! for a predictable, low load on the upstream platform.

use anyhow::Context;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::fetch::FetchClient;
use crate::key::ResourceKey;
use crate::storage::{Cache, CacheLookup, StorageError};

const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum GetError {
    /// Cache backend failure (a miss is not an error)
    #[error("Cache error: {0}")]
    Cache(#[from] StorageError),

    /// The generator failed; passed through unmodified, never cached
    #[error("Generation failed: {0}")]
    Generate(anyhow::Error),

    /// The worker has stopped (shutdown or panic)
    #[error("Coordinator worker is no longer running")]
    WorkerGone,
}

// ============================================================================
// Generator seam
// ============================================================================

/// Produces fresh feed content for a key on a cache miss.
///
/// Implementations wrap the platform-specific fetch/parse/render chain.
/// `generate` must depend only on the key; the coordinator imposes no
/// ordering between keys beyond its own FIFO queue.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, key: &ResourceKey) -> anyhow::Result<String>;
}

/// Closures are generators, which keeps tests and one-off wiring terse.
#[async_trait]
impl<F, Fut> Generate for F
where
    F: Fn(ResourceKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn generate(&self, key: &ResourceKey) -> anyhow::Result<String> {
        (self)(key.clone()).await
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// TTL applied to every document this coordinator caches. Feed
    /// documents want a short TTL (default 2h); slow-moving resources can
    /// run much longer.
    pub ttl: Duration,
    /// Bound on queued requests. Senders block when full, which is the
    /// backpressure story: callers wait instead of piling up work.
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// One queued unit of work: a key and a single-use reply slot.
///
/// Consumed exactly once by the worker, replied to exactly once, then
/// discarded. The coordinator never retries a request; retry policy lives
/// below it (fetch client) or above it (callers).
struct GenerationRequest {
    key: ResourceKey,
    reply: oneshot::Sender<Result<String, GetError>>,
}

/// Handle to a running coordinator.
pub struct Coordinator {
    requests: mpsc::Sender<GenerationRequest>,
    worker: JoinHandle<()>,
}

impl Coordinator {
    /// Start the worker for one resource family.
    pub fn spawn(
        cache: Arc<dyn Cache>,
        generator: Arc<dyn Generate>,
        config: CoordinatorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let ttl = config.ttl;
        let worker = tokio::spawn(async move {
            worker_loop(rx, cache, generator, ttl).await;
        });
        Self {
            requests: tx,
            worker,
        }
    }

    /// Serve one key: cached content if present, freshly generated (and
    /// cached) otherwise.
    ///
    /// Blocks while the request waits its turn behind every earlier
    /// request, regardless of key — a slow generation for one key stalls
    /// the whole queue by design.
    pub async fn get(&self, key: ResourceKey) -> Result<String, GetError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(GenerationRequest {
                key,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GetError::WorkerGone)?;
        reply_rx.await.map_err(|_| GetError::WorkerGone)?
    }

    /// Close the queue and wait for the worker to drain what it already
    /// accepted.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Coordinator worker ended abnormally");
        }
    }
}

// ============================================================================
// Fetch-backed generator
// ============================================================================

/// Generic generator that fetches the feed payload for a key from a
/// platform API.
///
/// The endpoint template substitutes `{platform}`, `{kind}` and `{ident}`
/// from the key. The API payload is taken verbatim as the feed document;
/// platform-specific parsing and rendering, where needed, wraps this in
/// its own [`Generate`] impl.
pub struct FetchGenerator {
    client: Arc<FetchClient>,
    endpoint_template: String,
}

impl FetchGenerator {
    pub fn new(client: Arc<FetchClient>, endpoint_template: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_template: endpoint_template.into(),
        }
    }

    fn endpoint_for(&self, key: &ResourceKey) -> anyhow::Result<url::Url> {
        let rendered = self
            .endpoint_template
            .replace("{platform}", key.platform())
            .replace("{kind}", key.kind())
            .replace("{ident}", key.ident());
        url::Url::parse(&rendered)
            .with_context(|| format!("Invalid endpoint for key {key}: {rendered}"))
    }
}

#[async_trait]
impl Generate for FetchGenerator {
    async fn generate(&self, key: &ResourceKey) -> anyhow::Result<String> {
        let url = self.endpoint_for(key)?;
        let payload = self.client.fetch_once(&url).await?;
        // String payloads are the document itself; structured payloads
        // are carried as compact JSON for a downstream renderer.
        Ok(match payload {
            serde_json::Value::String(document) => document,
            other => other.to_string(),
        })
    }
}

async fn worker_loop(
    mut requests: mpsc::Receiver<GenerationRequest>,
    cache: Arc<dyn Cache>,
    generator: Arc<dyn Generate>,
    ttl: Duration,
) {
    while let Some(request) = requests.recv().await {
        let outcome = serve(cache.as_ref(), generator.as_ref(), &request.key, ttl).await;
        if request.reply.send(outcome).is_err() {
            // Caller gave up; the cache write (if any) already happened,
            // so the work is not lost for the next caller.
            tracing::warn!(key = %request.key, "Caller went away before reply");
        }
    }
    tracing::debug!("Coordinator worker stopped: queue closed");
}

async fn serve(
    cache: &dyn Cache,
    generator: &dyn Generate,
    key: &ResourceKey,
    ttl: Duration,
) -> Result<String, GetError> {
    let cache_key = key.to_string();
    match cache.get(&cache_key).await? {
        CacheLookup::Hit(value) => {
            tracing::debug!(key = %key, "Cache hit");
            Ok(value)
        }
        CacheLookup::Miss => {
            tracing::info!(key = %key, "Cache miss, generating");
            let content = generator
                .generate(key)
                .await
                .map_err(GetError::Generate)?;
            // Cache before replying: a successful reply implies the cache
            // is already warm for everyone queued behind this request.
            cache.set(&cache_key, &content, ttl).await?;
            Ok(content)
        }
    }
}
