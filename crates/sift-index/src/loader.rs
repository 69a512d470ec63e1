use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sift_config::IndexConfig;
use sift_scheduler::{run_with_deadline, CancellationToken, TaskError};

use crate::store::{wait_for_outcome, Claim, LoadOutcome, LoadTicket};
use crate::{
    decode_shard, DirShardSource, Shard, ShardError, ShardKey, ShardSource, ShardStatus, ShardStore,
    SourceError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Upper bound on a single fetch. Decoding is not included.
    pub timeout: Duration,
    /// Payloads larger than this are rejected as malformed without decoding.
    pub max_shard_bytes: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for LoaderConfig {
    fn from(config: &IndexConfig) -> Self {
        Self {
            timeout: config.load_timeout(),
            max_shard_bytes: config.max_shard_bytes,
        }
    }
}

/// Diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Fetches actually issued against the source.
    pub fetches: u64,
    /// Requests that joined a fetch already in flight.
    pub coalesced: u64,
    /// Loads that ended in a [`ShardError`].
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

/// Fetches shards from a [`ShardSource`] into a shared [`ShardStore`].
///
/// Every load runs in its own Tokio task, so a caller that stops waiting
/// (for example because its query was superseded) does not abort the fetch:
/// the shard still lands in the store for the next query.
pub struct ShardLoader {
    store: Arc<ShardStore>,
    source: Arc<dyn ShardSource>,
    config: LoaderConfig,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
}

impl ShardLoader {
    pub fn new(store: Arc<ShardStore>, source: Arc<dyn ShardSource>, config: LoaderConfig) -> Self {
        Self {
            store,
            source,
            config,
            shutdown: CancellationToken::new(),
            counters: Arc::default(),
        }
    }

    /// Opens the shard directory named by `config.root` with a fresh store.
    pub async fn open(config: &IndexConfig) -> Result<Self, SourceError> {
        let Some(root) = &config.root else {
            return Err(SourceError::Other("index root is not configured".to_owned()));
        };
        let source = DirShardSource::open(root.clone(), config.format).await?;
        Ok(Self::new(
            Arc::new(ShardStore::new()),
            Arc::new(source),
            LoaderConfig::from(config),
        ))
    }

    pub fn store(&self) -> &Arc<ShardStore> {
        &self.store
    }

    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    /// Keys the source can provide, ascending.
    pub fn available_keys(&self) -> Vec<ShardKey> {
        self.source.keys()
    }

    pub fn has_shard(&self, key: ShardKey) -> bool {
        self.source.contains(key)
    }

    pub fn status(&self, key: ShardKey) -> ShardStatus {
        self.store.status(key)
    }

    /// Returns shard `key`, loading it if needed.
    ///
    /// Concurrent calls for the same key share one fetch. A key that failed as
    /// malformed keeps failing without I/O until [`ShardLoader::reload`];
    /// timeouts and fetch errors are retried.
    pub async fn ensure_loaded(&self, key: ShardKey) -> Result<Arc<Shard>, ShardError> {
        self.load(key, false).await
    }

    /// Loads `key` again even if it is loaded or failed.
    pub async fn reload(&self, key: ShardKey) -> Result<Arc<Shard>, ShardError> {
        tracing::debug!(target: "sift.index", shard = %key, "forced reload");
        self.load(key, true).await
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Cancels every fetch in flight. Their waiters observe a fetch failure.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn load(&self, key: ShardKey, force: bool) -> LoadOutcome {
        match self.store.claim(key, force) {
            Claim::Ready(outcome) => outcome,
            Claim::Wait(rx) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(target: "sift.index", shard = %key, "joining in-flight load");
                wait_for_outcome(key, rx).await
            }
            Claim::Start(ticket, rx) => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                let task = LoadTask {
                    source: Arc::clone(&self.source),
                    config: self.config,
                    shutdown: self.shutdown.clone(),
                    counters: Arc::clone(&self.counters),
                };
                tokio::spawn(task.run(ticket));
                wait_for_outcome(key, rx).await
            }
        }
    }
}

impl std::fmt::Debug for ShardLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardLoader")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

struct LoadTask {
    source: Arc<dyn ShardSource>,
    config: LoaderConfig,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
}

impl LoadTask {
    async fn run(self, ticket: LoadTicket) {
        let key = ticket.key();
        let started = Instant::now();
        let outcome = self.fetch_and_decode(key).await;

        match &outcome {
            Ok(shard) => tracing::debug!(
                target: "sift.index",
                shard = %key,
                tokens = shard.token_count(),
                entries = shard.entry_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "shard loaded"
            ),
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "sift.index",
                    shard = %key,
                    retryable = err.is_retryable(),
                    error = %err,
                    "shard load failed"
                );
            }
        }

        ticket.resolve(outcome);
    }

    async fn fetch_and_decode(&self, key: ShardKey) -> LoadOutcome {
        let fetched = run_with_deadline(self.config.timeout, &self.shutdown, self.source.fetch(key)).await;
        let bytes = match fetched {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                return Err(ShardError::Fetch {
                    key,
                    message: err.to_string(),
                })
            }
            Err(TaskError::DeadlineExceeded(after)) => return Err(ShardError::Timeout { key, after }),
            Err(TaskError::Cancelled) => {
                return Err(ShardError::Fetch {
                    key,
                    message: "loader shut down".to_owned(),
                })
            }
        };

        if bytes.len() > self.config.max_shard_bytes {
            return Err(ShardError::malformed(
                key,
                format!(
                    "shard is {} bytes (limit {} bytes)",
                    bytes.len(),
                    self.config.max_shard_bytes
                ),
            ));
        }

        // Parsing a large shard is CPU-bound; keep it off the runtime thread.
        let format = self.source.format();
        match tokio::task::spawn_blocking(move || decode_shard(key, &bytes, format)).await {
            Ok(decoded) => decoded.map(Arc::new),
            Err(err) => Err(ShardError::Fetch {
                key,
                message: format!("decode task failed: {err}"),
            }),
        }
    }
}
