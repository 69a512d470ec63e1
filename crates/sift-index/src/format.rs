//! Native JSON shard documents.
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "key": "i",
//!   "buckets": [
//!     ["init", [{"name": "isAllowed", "scope": ["hermes", "SkymapMask"],
//!                "target": "skymapmask.html#a1"}]]
//!   ]
//! }
//! ```
//!
//! Buckets are a sequence of `[token, entries]` pairs rather than a JSON
//! object so that duplicate tokens survive parsing and can be rejected.

use serde::{Deserialize, Serialize};

use crate::model::{IndexEntry, ScopeKind, Shard, ShardKey, Target, TokenBucket};
use crate::{doxygen, ShardError, ShardFormat};

pub const SHARD_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShardFile {
    format_version: u32,
    key: String,
    buckets: Vec<(String, Vec<EntryRecord>)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryRecord {
    name: String,
    scope: Vec<String>,
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    overload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<ScopeKind>,
}

/// Decodes shard `key` from `bytes` in the given on-disk format.
pub fn decode_shard(key: ShardKey, bytes: &[u8], format: ShardFormat) -> Result<Shard, ShardError> {
    match format {
        ShardFormat::Json => decode_json_shard(key, bytes),
        ShardFormat::Doxygen => {
            let text = std::str::from_utf8(bytes).map_err(|err| {
                ShardError::malformed(key, format!("search data is not valid UTF-8: {err}"))
            })?;
            let buckets = doxygen::parse_search_data(text)
                .map_err(|err| ShardError::malformed(key, err.to_string()))?;
            Shard::new(key, buckets)
        }
    }
}

pub fn decode_json_shard(key: ShardKey, bytes: &[u8]) -> Result<Shard, ShardError> {
    let file: ShardFile = serde_json::from_slice(bytes)
        .map_err(|err| ShardError::malformed(key, format!("invalid shard document: {err}")))?;

    if file.format_version != SHARD_FORMAT_VERSION {
        return Err(ShardError::malformed(
            key,
            format!(
                "unsupported format version: expected {SHARD_FORMAT_VERSION}, found {}",
                file.format_version
            ),
        ));
    }

    let declared: ShardKey = file
        .key
        .parse()
        .map_err(|err: String| ShardError::malformed(key, err))?;
    if declared != key {
        return Err(ShardError::malformed(
            key,
            format!("shard key mismatch: requested `{key}`, found `{declared}`"),
        ));
    }

    let mut buckets = Vec::with_capacity(file.buckets.len());
    for (token, records) in file.buckets {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let target = Target::parse(&record.target).map_err(|err| {
                ShardError::malformed(key, format!("entry `{}`: {err}", record.name))
            })?;
            entries.push(IndexEntry {
                display_name: record.name,
                qualified_scope: record.scope,
                target,
                overload: record.overload,
                kind: record.kind,
            });
        }
        buckets.push(TokenBucket { token, entries });
    }

    Shard::new(key, buckets)
}

/// Encodes `shard` as a native JSON document.
pub fn encode_shard(shard: &Shard) -> Result<Vec<u8>, serde_json::Error> {
    let file = ShardFile {
        format_version: SHARD_FORMAT_VERSION,
        key: shard.key().to_string(),
        buckets: shard
            .buckets()
            .iter()
            .map(|bucket| {
                let records = bucket
                    .entries
                    .iter()
                    .map(|entry| EntryRecord {
                        name: entry.display_name.clone(),
                        scope: entry.qualified_scope.clone(),
                        target: entry.target.to_string(),
                        overload: entry.overload.clone(),
                        kind: entry.kind,
                    })
                    .collect();
                (bucket.token.clone(), records)
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&file)
}
