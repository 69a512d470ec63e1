use std::time::Duration;

use crate::ShardKey;

/// Why a shard is unavailable for matching.
///
/// `Clone` so a single failed load can be reported to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShardError {
    /// The shard content violates the structural contract. Sticky until a
    /// forced reload.
    #[error("malformed shard `{key}`: {reason}")]
    Malformed { key: ShardKey, reason: String },

    /// The fetch did not resolve in time. Retried by the next query that
    /// needs the shard.
    #[error("shard `{key}` did not load within {after:?}")]
    Timeout { key: ShardKey, after: Duration },

    /// The source failed to produce bytes. Retried like a timeout.
    #[error("failed to fetch shard `{key}`: {message}")]
    Fetch { key: ShardKey, message: String },
}

impl ShardError {
    pub(crate) fn malformed(key: ShardKey, reason: impl Into<String>) -> Self {
        ShardError::Malformed {
            key,
            reason: reason.into(),
        }
    }

    pub fn key(&self) -> ShardKey {
        match self {
            ShardError::Malformed { key, .. }
            | ShardError::Timeout { key, .. }
            | ShardError::Fetch { key, .. } => *key,
        }
    }

    /// Whether the next query that needs this shard should try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ShardError::Malformed { .. })
    }
}

/// Errors produced by a [`ShardSource`](crate::ShardSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shard `{0}` is not provided by this source")]
    UnknownShard(ShardKey),

    #[error("{0}")]
    Other(String),
}
