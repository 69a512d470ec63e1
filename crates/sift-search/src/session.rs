use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex};
use sift_config::SearchConfig;
use sift_fuzzy::normalize_query;
use sift_index::ShardLoader;
use sift_scheduler::Debouncer;

use crate::{group_rows, rank, QueryMatcher, ResultRow, ShardWarning};

/// Where a session is in its query lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No active query.
    Idle,
    /// Input changed; a match is scheduled.
    Typing,
    /// The scheduled match is waiting for shard loads.
    Loading,
    /// Results for the current generation were delivered.
    Settled,
}

/// The last results handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledResults {
    pub generation: u64,
    pub rows: Arc<[ResultRow]>,
    pub warnings: Arc<[ShardWarning]>,
}

type ResultsCallback = Arc<dyn Fn(&[ResultRow], u64) + Send + Sync>;
type WarningCallback = Arc<dyn Fn(&ShardWarning, u64) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    results: Vec<ResultsCallback>,
    warnings: Vec<WarningCallback>,
}

struct SessionInner {
    matcher: QueryMatcher,
    debouncer: Debouncer,
    result_limit: usize,
    generation: AtomicU64,
    closed: AtomicBool,
    state: Mutex<SessionState>,
    subscribers: Mutex<Subscribers>,
    latest: Mutex<Option<SettledResults>>,
    /// Serializes generation bumps against delivery. Reentrant so that
    /// subscribers may submit new input from inside a callback.
    delivery: ReentrantMutex<()>,
}

/// Drives one search box: debounces input, matches, ranks and delivers.
///
/// Every call to [`SearchSession::submit_input`] starts a new generation.
/// Results are only ever delivered for the newest generation; anything a
/// superseded generation produces is discarded when it arrives.
pub struct SearchSession {
    inner: Arc<SessionInner>,
}

impl SearchSession {
    /// Creates a session whose debounced matches run on `handle`.
    pub fn new(loader: Arc<ShardLoader>, config: &SearchConfig, handle: tokio::runtime::Handle) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                matcher: QueryMatcher::new(loader, config.match_mode),
                debouncer: Debouncer::new(handle, config.debounce()),
                result_limit: config.result_limit,
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                state: Mutex::new(SessionState::Idle),
                subscribers: Mutex::new(Subscribers::default()),
                latest: Mutex::new(None),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Feeds the current text of the search box. Never blocks on I/O.
    pub fn submit_input(&self, text: &str) {
        let inner = &self.inner;
        let _delivery = inner.delivery.lock();
        if inner.closed.load(Ordering::Acquire) {
            return;
        }

        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let Some(query) = normalize_query(text) else {
            inner.debouncer.cancel();
            *inner.state.lock() = SessionState::Idle;
            tracing::trace!(target: "sift.search", generation, "empty query");
            inner.deliver(generation, Arc::from(Vec::new()), Arc::from(Vec::new()), SessionState::Idle);
            return;
        };

        *inner.state.lock() = SessionState::Typing;
        tracing::trace!(target: "sift.search", generation, query = %query, "query scheduled");

        let weak = Arc::downgrade(inner);
        inner.debouncer.debounce(move || run_query(weak, query, generation));
    }

    /// Subscribes to settled results. Callbacks run with the generation they
    /// belong to and may call [`SearchSession::submit_input`].
    pub fn on_results(&self, callback: impl Fn(&[ResultRow], u64) + Send + Sync + 'static) {
        self.inner.subscribers.lock().results.push(Arc::new(callback));
    }

    /// Subscribes to non-fatal shard failures, reported once per failed shard
    /// each time a generation settles.
    pub fn on_warning(&self, callback: impl Fn(&ShardWarning, u64) + Send + Sync + 'static) {
        self.inner.subscribers.lock().warnings.push(Arc::new(callback));
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// The newest generation produced by [`SearchSession::submit_input`].
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn results(&self) -> Option<SettledResults> {
        self.inner.latest.lock().clone()
    }

    pub fn matcher(&self) -> &QueryMatcher {
        &self.inner.matcher
    }

    /// Stops the session. Pending and in-flight matches are discarded and
    /// further input is ignored.
    pub fn close(&self) {
        let inner = &self.inner;
        let _delivery = inner.delivery.lock();
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.debouncer.cancel();
        inner.generation.fetch_add(1, Ordering::AcqRel);
        *inner.state.lock() = SessionState::Idle;
        tracing::debug!(target: "sift.search", "search session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSession")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_query(inner: Weak<SessionInner>, query: String, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if !inner.is_current(generation) {
        return;
    }

    let started = Instant::now();
    if inner.matcher.needs_loading(&query) {
        let _delivery = inner.delivery.lock();
        if inner.is_current(generation) {
            *inner.state.lock() = SessionState::Loading;
        }
    }

    let matched = inner.matcher.match_query(&query, generation).await;
    let rows = group_rows(&rank(matched.candidates), inner.result_limit);

    tracing::debug!(
        target: "sift.search",
        generation,
        query = %matched.query,
        rows = rows.len(),
        warnings = matched.warnings.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "query settled"
    );
    inner.deliver(
        generation,
        Arc::from(rows),
        Arc::from(matched.warnings),
        SessionState::Settled,
    );
}

impl SessionInner {
    fn is_current(&self, generation: u64) -> bool {
        !self.closed.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    fn deliver(
        &self,
        generation: u64,
        rows: Arc<[ResultRow]>,
        warnings: Arc<[ShardWarning]>,
        settled_state: SessionState,
    ) {
        let _delivery = self.delivery.lock();
        if !self.is_current(generation) {
            tracing::trace!(target: "sift.search", generation, "discarding stale results");
            return;
        }

        *self.state.lock() = settled_state;
        *self.latest.lock() = Some(SettledResults {
            generation,
            rows: Arc::clone(&rows),
            warnings: Arc::clone(&warnings),
        });

        let (result_callbacks, warning_callbacks) = {
            let subscribers = self.subscribers.lock();
            (subscribers.results.clone(), subscribers.warnings.clone())
        };

        for warning in warnings.iter() {
            for callback in &warning_callbacks {
                if !self.is_current(generation) {
                    return;
                }
                callback(warning, generation);
            }
        }
        for callback in &result_callbacks {
            // A callback may have submitted newer input.
            if !self.is_current(generation) {
                return;
            }
            callback(&rows, generation);
        }
    }
}
