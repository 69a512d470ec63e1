//! Incremental symbol search over a sharded documentation index.
//!
//! A [`SearchSession`] turns keystrokes into ranked [`ResultRow`]s:
//!
//! 1. input is debounced; each submission bumps the session generation,
//! 2. the [`QueryMatcher`] loads the shards the query needs through the
//!    shared [`sift_index::ShardLoader`] and collects [`Candidate`]s,
//! 3. the ranker orders, deduplicates and groups them into rows,
//! 4. rows are delivered only if their generation is still the newest.
//!
//! Shard failures never abort a query. They surface as [`ShardWarning`]s
//! next to whatever the healthy shards produced.

mod matcher;
mod ranker;
mod session;

pub use matcher::{match_shard, Candidate, MatchResult, QueryMatcher, ShardWarning};
pub use ranker::{compare, dedupe, group_rows, rank, ResultRow, Variant};
pub use session::{SearchSession, SessionState, SettledResults};

pub use sift_config::{MatchMode, SearchConfig};
pub use sift_fuzzy::MatchKind;
