use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::CancellationToken;

struct PendingEntry {
    id: u64,
    token: CancellationToken,
}

struct DebouncerInner {
    handle: tokio::runtime::Handle,
    delay: Duration,
    next_id: AtomicU64,
    pending: Mutex<Option<PendingEntry>>,
}

/// Single-slot debouncer.
///
/// Each call to [`Debouncer::debounce`] supersedes the previous one if that
/// one is still waiting out its delay. Once a job has fired it runs to
/// completion; callers that need to ignore a superseded job's output must do
/// so themselves (the search session filters by generation).
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

impl Debouncer {
    pub fn new(handle: tokio::runtime::Handle, delay: Duration) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                handle,
                delay,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Schedules `f` to run after the configured delay, superseding any job
    /// that has not fired yet.
    pub fn debounce<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut pending = self.inner.pending.lock();
            if let Some(previous) = pending.replace(PendingEntry {
                id,
                token: token.clone(),
            }) {
                previous.token.cancel();
            }
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.delay;

        self.inner.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::trace!(target: "sift.scheduler", id, "debounced job superseded");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let mut pending = inner.pending.lock();
                if pending.as_ref().is_some_and(|entry| entry.id == id) {
                    pending.take();
                }
            }

            f().await;
        });
    }

    /// Cancels the job that is still waiting, if any.
    pub fn cancel(&self) -> bool {
        let Some(entry) = self.inner.pending.lock().take() else {
            return false;
        };
        entry.token.cancel();
        true
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }
}
