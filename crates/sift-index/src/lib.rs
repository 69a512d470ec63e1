//! Sharded documentation symbol index.
//!
//! The index is split into [`Shard`]s by the first folded character of each
//! search token (see [`ShardKey::for_token`]). Shards are produced at
//! documentation build time and are immutable once loaded; the
//! [`ShardStore`] caches them for the lifetime of the process and the
//! [`ShardLoader`] fetches them on demand from a [`ShardSource`], coalescing
//! concurrent requests for the same key into a single fetch.

mod doxygen;
mod error;
mod format;
mod loader;
mod model;
mod source;
mod store;

pub use doxygen::{parse_search_data, DoxygenError};
pub use error::{ShardError, SourceError};
pub use format::{decode_json_shard, decode_shard, encode_shard, SHARD_FORMAT_VERSION};
pub use loader::{LoaderConfig, LoaderStats, ShardLoader};
pub use model::{
    qualified_name, IndexEntry, ScopeKind, Shard, ShardKey, Target, TargetError, TokenBucket,
};
pub use source::{DirShardSource, MemoryShardSource, ShardSource};
pub use store::{ShardStatus, ShardStore};

pub use sift_config::ShardFormat;
