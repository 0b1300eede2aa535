pub mod ai;
pub mod api;
pub mod assistant;
pub mod calendar;
pub mod clean;
pub mod db;
pub mod enrich;
pub mod error;
pub mod faq;
pub mod line;
pub mod prompt;
pub mod record;
pub mod retrieve;
pub mod util;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type SharedDB = Arc<db::KnowledgeDB>;

/// Run a blocking DB operation on tokio's blocking thread pool.
///
/// Retrieval runs FTS queries and scans the snapshot; keep it off the
/// async worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::AssistantError>
where
    F: FnOnce(&db::KnowledgeDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::AssistantError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDB,
    pub ai: Option<ai::AiConfig>,
    pub line: Option<line::LineConfig>,
    pub api_key: Option<String>,
    pub embed_cache: EmbedCache,
    pub faq: Arc<faq::Faq>,
    pub calendar: Arc<calendar::SchoolCalendar>,
    pub started_at: std::time::Instant,
}

impl AppState {
    /// State with no AI, no messaging and the built-in FAQ.
    pub fn new(db: SharedDB) -> Self {
        Self {
            db,
            ai: None,
            line: None,
            api_key: None,
            embed_cache: EmbedCache::new(256),
            faq: Arc::new(faq::Faq::fallback()),
            calendar: Arc::new(calendar::SchoolCalendar::default()),
            started_at: std::time::Instant::now(),
        }
    }
}

use lru::LruCache;
use std::num::NonZeroUsize;

/// LRU of query embeddings, keyed by the prefixed query text.
#[derive(Clone)]
pub struct EmbedCache {
    inner: Arc<parking_lot::Mutex<EmbedCacheInner>>,
}

struct EmbedCacheInner {
    cache: LruCache<String, Vec<f32>>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl EmbedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(parking_lot::Mutex::new(EmbedCacheInner {
                cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock();
        let val = inner.cache.get(key).cloned();
        if val.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        val
    }

    pub fn insert(&self, key: String, value: Vec<f32>) {
        self.inner.lock().cache.put(key, value);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.cache.len(),
            capacity: inner.cache.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

const EMBED_BATCH: usize = 32;
const EMBED_ATTEMPTS: u64 = 3;

/// Embed every record that has no cached vector for the configured model.
///
/// Batches are retried with a growing pause; a batch that keeps failing is
/// skipped so the rest still get vectors. Returns how many were stored.
pub async fn backfill_embeddings(db: SharedDB, cfg: ai::AiConfig) -> Result<usize, error::AssistantError> {
    if !cfg.has_embed() {
        return Ok(0);
    }
    let model = cfg.embed_model.clone();
    let cached = db_call(&db, move |d| d.load_vec_index(&model)).await??;
    let missing = db_call(&db, |d| d.missing_embeddings()).await?;
    info!(cached, missing = missing.len(), "embedding backfill");

    let mut stored = 0;
    for batch in missing.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch
            .iter()
            .map(|(_, text)| format!("{}{}", cfg.passage_prefix, text))
            .collect();
        let mut attempts = 0;
        let vectors = loop {
            attempts += 1;
            match ai::get_embeddings(&cfg, &texts).await {
                Ok(v) => break Some(v),
                Err(e) if attempts < EMBED_ATTEMPTS => {
                    warn!(error = %e, attempt = attempts, "embedding batch failed, retrying");
                    tokio::time::sleep(Duration::from_secs(attempts * 2)).await;
                }
                Err(e) => {
                    warn!(error = %e, size = batch.len(), "embedding batch failed, skipping");
                    break None;
                }
            }
        };
        let Some(vectors) = vectors else { continue };

        let items: Vec<(i64, Vec<f32>)> = batch.iter().map(|(id, _)| *id).zip(vectors).collect();
        let model = cfg.embed_model.clone();
        stored += db_call(&db, move |d| {
            items
                .iter()
                .filter(|(id, v)| match d.set_embedding(*id, &model, v) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, id, "storing embedding failed");
                        false
                    }
                })
                .count()
        })
        .await?;
    }
    info!(stored, "embedding backfill done");
    Ok(stored)
}

/// Fire-and-forget wrapper around [`backfill_embeddings`].
pub fn spawn_embed_backfill(db: SharedDB, cfg: ai::AiConfig) {
    tokio::spawn(async move {
        if let Err(e) = backfill_embeddings(db, cfg).await {
            warn!(error = %e, "embedding backfill aborted");
        }
    });
}
