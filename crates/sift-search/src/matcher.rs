use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use sift_config::MatchMode;
use sift_fuzzy::{classify, fold_case, normalize_query, MatchKind};
use sift_index::{IndexEntry, Shard, ShardError, ShardKey, ShardLoader, ShardStatus, TokenBucket};

/// One entry reached by a query, before ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub entry: IndexEntry,
    /// Token of the bucket the entry was found in.
    pub token: String,
    /// Length of `token` in chars; shorter is closer to the query.
    pub token_rank: usize,
    /// How the entry's display name matched, or the token's match when the
    /// name itself does not contain the query.
    pub kind: MatchKind,
}

/// A shard that could not take part in a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardWarning {
    pub key: ShardKey,
    pub reason: String,
    /// Whether a later query will try the shard again.
    pub retryable: bool,
}

impl From<&ShardError> for ShardWarning {
    fn from(err: &ShardError) -> Self {
        Self {
            key: err.key(),
            reason: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub generation: u64,
    /// Normalized query; empty for the no-op result.
    pub query: String,
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<ShardWarning>,
}

impl MatchResult {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Resolves queries against the shards they need.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    loader: Arc<ShardLoader>,
    mode: MatchMode,
}

impl QueryMatcher {
    pub fn new(loader: Arc<ShardLoader>, mode: MatchMode) -> Self {
        Self { loader, mode }
    }

    pub fn loader(&self) -> &Arc<ShardLoader> {
        &self.loader
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Shards that can hold a match for the normalized `query`, ascending.
    ///
    /// Keys missing from the source manifest are left out: they hold nothing
    /// and are not worth a warning.
    pub fn shard_keys_for(&self, query: &str) -> Vec<ShardKey> {
        match self.mode {
            MatchMode::Prefix => ShardKey::for_token(query)
                .filter(|key| self.loader.has_shard(*key))
                .into_iter()
                .collect(),
            MatchMode::Substring => self.loader.available_keys(),
        }
    }

    /// Whether matching `query` will have to wait for a fetch.
    pub fn needs_loading(&self, query: &str) -> bool {
        self.shard_keys_for(query)
            .into_iter()
            .any(|key| match self.loader.status(key) {
                ShardStatus::Loaded(_) => false,
                ShardStatus::Failed(err) => err.is_retryable(),
                ShardStatus::NotLoaded | ShardStatus::Loading => true,
            })
    }

    /// Matches raw query text.
    ///
    /// Completes only once every shard the query needs has resolved. Shards
    /// that fail contribute a warning instead of candidates. An empty query
    /// returns immediately without consulting the store.
    pub async fn match_query(&self, text: &str, generation: u64) -> MatchResult {
        let Some(query) = normalize_query(text) else {
            return MatchResult::empty(generation);
        };

        let keys = self.shard_keys_for(&query);
        let loads = join_all(keys.iter().map(|&key| self.loader.ensure_loaded(key))).await;

        let mut result = MatchResult {
            generation,
            query,
            ..MatchResult::default()
        };
        for outcome in loads {
            match outcome {
                Ok(shard) => result
                    .candidates
                    .extend(match_shard(&shard, &result.query, self.mode)),
                Err(err) => result.warnings.push(ShardWarning::from(&err)),
            }
        }

        tracing::trace!(
            target: "sift.search",
            generation,
            query = %result.query,
            shards = keys.len(),
            candidates = result.candidates.len(),
            warnings = result.warnings.len(),
            "matched query"
        );
        result
    }
}

/// Collects the candidates for a normalized, non-empty `query` from one shard.
///
/// Every entry filed under a token that starts with `query` is returned, as
/// is every entry whose folded display name starts with `query` regardless
/// of its token. [`MatchMode::Substring`] additionally admits tokens and
/// names that contain `query` anywhere.
pub fn match_shard(shard: &Shard, query: &str, mode: MatchMode) -> Vec<Candidate> {
    let mut out = Vec::new();
    match mode {
        MatchMode::Prefix => {
            let mut seen: HashSet<&str> = HashSet::new();
            for bucket in shard.prefix_buckets(query) {
                seen.insert(bucket.token.as_str());
                let token_kind = classify(query, &bucket.token).unwrap_or(MatchKind::Prefix);
                push_bucket(&mut out, bucket, query, Some(token_kind));
            }
            for (bucket, entry) in shard.entries_with_name_prefix(query) {
                if seen.contains(bucket.token.as_str()) {
                    continue;
                }
                let kind = classify(query, &fold_case(&entry.display_name)).unwrap_or(MatchKind::Prefix);
                out.push(candidate(bucket, entry, kind));
            }
        }
        MatchMode::Substring => {
            for bucket in shard.buckets() {
                push_bucket(&mut out, bucket, query, classify(query, &bucket.token));
            }
        }
    }
    out
}

fn push_bucket(out: &mut Vec<Candidate>, bucket: &TokenBucket, query: &str, token_kind: Option<MatchKind>) {
    for entry in &bucket.entries {
        let name_kind = classify(query, &fold_case(&entry.display_name));
        if let Some(kind) = name_kind.or(token_kind) {
            out.push(candidate(bucket, entry, kind));
        }
    }
}

fn candidate(bucket: &TokenBucket, entry: &IndexEntry, kind: MatchKind) -> Candidate {
    Candidate {
        entry: entry.clone(),
        token: bucket.token.clone(),
        token_rank: bucket.token.chars().count(),
        kind,
    }
}
