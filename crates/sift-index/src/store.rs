use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{Shard, ShardError, ShardKey};

pub(crate) type LoadOutcome = Result<Arc<Shard>, ShardError>;
type OutcomeSender = watch::Sender<Option<LoadOutcome>>;
pub(crate) type OutcomeReceiver = watch::Receiver<Option<LoadOutcome>>;

/// Observable state of one shard key.
#[derive(Debug, Clone)]
pub enum ShardStatus {
    NotLoaded,
    Loading,
    Loaded(Arc<Shard>),
    Failed(ShardError),
}

impl ShardStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ShardStatus::Loaded(_) | ShardStatus::Failed(_))
    }
}

enum Slot {
    Loading(OutcomeSender),
    Loaded(Arc<Shard>),
    Failed(ShardError),
}

/// Process-wide cache of loaded shards.
///
/// Loaded shards are never evicted or replaced except by an explicit reload,
/// so an `Arc<Shard>` handed out once stays valid and unchanged. The store
/// performs no I/O; the [`ShardLoader`](crate::ShardLoader) drives it.
#[derive(Default)]
pub struct ShardStore {
    slots: Mutex<HashMap<ShardKey, Slot>>,
}

/// What a loader should do for a key after consulting the store.
pub(crate) enum Claim {
    /// Already resolved; nothing to fetch.
    Ready(LoadOutcome),
    /// Another caller's load is in flight.
    Wait(OutcomeReceiver),
    /// The caller owns the load and must resolve the ticket.
    Start(LoadTicket, OutcomeReceiver),
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached shard without triggering a load.
    pub fn get_shard(&self, key: ShardKey) -> Option<Arc<Shard>> {
        match self.slots.lock().get(&key) {
            Some(Slot::Loaded(shard)) => Some(Arc::clone(shard)),
            _ => None,
        }
    }

    pub fn status(&self, key: ShardKey) -> ShardStatus {
        match self.slots.lock().get(&key) {
            None => ShardStatus::NotLoaded,
            Some(Slot::Loading(_)) => ShardStatus::Loading,
            Some(Slot::Loaded(shard)) => ShardStatus::Loaded(Arc::clone(shard)),
            Some(Slot::Failed(err)) => ShardStatus::Failed(err.clone()),
        }
    }

    pub fn loaded_keys(&self) -> Vec<ShardKey> {
        let mut keys: Vec<ShardKey> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loaded(_)))
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Current failures, ordered by key.
    pub fn failed(&self) -> Vec<ShardError> {
        let mut failures: Vec<ShardError> = self
            .slots
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Failed(err) => Some(err.clone()),
                _ => None,
            })
            .collect();
        failures.sort_by_key(ShardError::key);
        failures
    }

    /// Forgets a recorded failure so the next request loads the key again.
    pub fn clear_failure(&self, key: ShardKey) -> bool {
        let mut slots = self.slots.lock();
        if matches!(slots.get(&key), Some(Slot::Failed(_))) {
            slots.remove(&key);
            true
        } else {
            false
        }
    }

    /// Installs an already decoded shard. A load in flight for the same key
    /// keeps running and its result replaces this one.
    pub fn preload(&self, shard: Shard) -> Arc<Shard> {
        let shard = Arc::new(shard);
        let mut slots = self.slots.lock();
        match slots.get(&shard.key()) {
            Some(Slot::Loading(_)) => {}
            _ => {
                slots.insert(shard.key(), Slot::Loaded(Arc::clone(&shard)));
            }
        }
        shard
    }

    /// Decides who loads `key`.
    ///
    /// Concurrent claims on an unresolved key all observe the first claimer's
    /// load. `force` restarts a resolved key (loaded or failed) but still
    /// joins a load that is already in flight.
    pub(crate) fn claim(self: &Arc<Self>, key: ShardKey, force: bool) -> Claim {
        let mut slots = self.slots.lock();
        match slots.get(&key) {
            Some(Slot::Loading(tx)) => return Claim::Wait(tx.subscribe()),
            Some(Slot::Loaded(shard)) if !force => return Claim::Ready(Ok(Arc::clone(shard))),
            Some(Slot::Failed(err)) if !force && !err.is_retryable() => {
                return Claim::Ready(Err(err.clone()))
            }
            _ => {}
        }

        let (tx, rx) = watch::channel(None);
        slots.insert(key, Slot::Loading(tx));
        let ticket = LoadTicket {
            store: Arc::clone(self),
            key,
            resolved: false,
        };
        Claim::Start(ticket, rx)
    }

    fn resolve(&self, key: ShardKey, outcome: LoadOutcome) {
        let mut slots = self.slots.lock();
        let slot = match &outcome {
            Ok(shard) => Slot::Loaded(Arc::clone(shard)),
            Err(err) => Slot::Failed(err.clone()),
        };
        if let Some(Slot::Loading(tx)) = slots.insert(key, slot) {
            tx.send_replace(Some(outcome));
        }
    }
}

impl std::fmt::Debug for ShardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        let mut keys: Vec<_> = slots.keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("ShardStore").field("keys", &keys).finish()
    }
}

/// Ownership of an in-flight load.
///
/// Dropping an unresolved ticket (the load task panicked or was aborted)
/// records a retryable fetch failure so waiters never hang.
pub(crate) struct LoadTicket {
    store: Arc<ShardStore>,
    key: ShardKey,
    resolved: bool,
}

impl LoadTicket {
    pub(crate) fn key(&self) -> ShardKey {
        self.key
    }

    pub(crate) fn resolve(mut self, outcome: LoadOutcome) {
        self.resolved = true;
        self.store.resolve(self.key, outcome);
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        if !self.resolved {
            self.store.resolve(
                self.key,
                Err(ShardError::Fetch {
                    key: self.key,
                    message: "load task ended without a result".to_owned(),
                }),
            );
        }
    }
}

/// Waits for the load behind `rx` to resolve.
pub(crate) async fn wait_for_outcome(key: ShardKey, mut rx: OutcomeReceiver) -> LoadOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => match outcome.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(abandoned(key)),
        },
        Err(_) => Err(abandoned(key)),
    }
}

fn abandoned(key: ShardKey) -> ShardError {
    ShardError::Fetch {
        key,
        message: "load abandoned".to_owned(),
    }
}
