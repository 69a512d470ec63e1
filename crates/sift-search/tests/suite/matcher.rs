use std::time::Duration;

use pretty_assertions::assert_eq;
use sift_fuzzy::fold_case;
use sift_index::{decode_json_shard, MemoryShardSource, TokenBucket};
use sift_search::{group_rows, rank, MatchKind, MatchMode, QueryMatcher};

use super::support::{entry, hermes_i, hermes_source, init_only, key, loader, shard_bytes, SlowSource};

#[tokio::test(flavor = "current_thread")]
async fn ini_finds_the_entry_filed_under_init() {
    let source = SlowSource::new(
        MemoryShardSource::default().with_shard(key('i'), init_only()),
        Duration::ZERO,
    );
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Prefix);

    let result = matcher.match_query("ini", 7).await;
    assert_eq!(result.generation, 7);
    assert_eq!(result.query, "ini");
    assert!(result.warnings.is_empty());

    let rows = group_rows(&rank(result.candidates), 0);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].qualified_name(), "hermes::SkymapMask::isAllowed");
    assert_eq!(rows[0].variants[0].target.to_string(), "skymapmask.html#a1");
}

#[tokio::test(flavor = "current_thread")]
async fn empty_queries_never_touch_the_store() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source.clone(), Duration::from_secs(2)), MatchMode::Substring);

    let result = matcher.match_query(" \t ", 3).await;
    assert!(result.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(source.fetches(), 0);
    assert!(matcher.loader().store().loaded_keys().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn shards_missing_from_the_manifest_are_silent() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source.clone(), Duration::from_secs(2)), MatchMode::Prefix);

    assert!(matcher.shard_keys_for("zeta").is_empty());
    let result = matcher.match_query("Zeta", 1).await;
    assert!(result.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(source.fetches(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_shards_become_warnings_next_to_partial_results() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Substring);

    let result = matcher.match_query("isAllowed", 2).await;
    let names: Vec<String> = rank(result.candidates)
        .iter()
        .map(|candidate| candidate.entry.qualified_name())
        .collect();
    assert_eq!(
        names,
        vec!["hermes::SkymapMask::isAllowed", "hermes::InvertMask::isAllowed"]
    );

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].key, key('m'));
    assert!(!result.warnings[0].retryable);
    assert!(result.warnings[0].reason.contains("duplicate token `map`"));
}

#[tokio::test(flavor = "current_thread")]
async fn ranking_is_reproducible() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Substring);

    let first = group_rows(&rank(matcher.match_query("i", 1).await.candidates), 0);
    for generation in 2..5 {
        let again = group_rows(&rank(matcher.match_query("i", generation).await.candidates), 0);
        assert_eq!(again, first);
    }
    assert_eq!(first[0].match_kind, MatchKind::Prefix);
}

#[tokio::test(flavor = "current_thread")]
async fn every_name_with_the_query_as_prefix_is_a_candidate() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Prefix);
    let shard = decode_json_shard(key('i'), &hermes_i()).unwrap();

    for query in ["i", "in", "int", "integrateo", "is", "isa", "isallowed"] {
        let candidates = matcher.match_query(query, 1).await.candidates;
        for bucket in shard.buckets() {
            for entry in &bucket.entries {
                if fold_case(&entry.display_name).starts_with(query) {
                    assert!(
                        candidates.iter().any(|c| &c.entry == entry),
                        "`{query}` missed {}",
                        entry.qualified_name()
                    );
                }
            }
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn needs_loading_tracks_shard_state() {
    let source = hermes_source(Duration::ZERO);
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Prefix);

    assert!(matcher.needs_loading("in"));
    matcher.match_query("in", 1).await;
    assert!(!matcher.needs_loading("in"));

    // Sticky failures do not need loading either.
    assert!(matcher.needs_loading("map"));
    let result = matcher.match_query("map", 2).await;
    assert_eq!(result.warnings.len(), 1);
    assert!(!matcher.needs_loading("map"));

    let reloaded = matcher.loader().reload(key('m')).await;
    assert!(reloaded.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn names_filed_in_a_foreign_shard_fail_that_shard() {
    let misfiled: &[u8] = br#"{"format_version": 1, "key": "i", "buckets": [
        ["init", [{"name": "mapThing", "scope": ["hermes"], "target": "m.html#a1"}]]
    ]}"#;
    let source = SlowSource::new(
        MemoryShardSource::default()
            .with_shard(key('i'), misfiled)
            .with_shard(
                key('m'),
                shard_bytes(
                    'm',
                    vec![TokenBucket::new(
                        "mapthing",
                        vec![entry("mapThing", &["hermes"], "m.html#a2")],
                    )],
                ),
            ),
        Duration::ZERO,
    );
    let matcher = QueryMatcher::new(loader(source, Duration::from_secs(2)), MatchMode::Prefix);

    let result = matcher.match_query("map", 1).await;
    assert!(result.warnings.is_empty());
    let targets: Vec<String> = result
        .candidates
        .iter()
        .map(|candidate| candidate.entry.target.to_string())
        .collect();
    assert_eq!(targets, vec!["m.html#a2"]);

    let result = matcher.match_query("ini", 2).await;
    assert!(result.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].key, key('i'));
    assert!(!result.warnings[0].retryable);
    assert!(result.warnings[0].reason.contains("belongs to shard `m`"));
}
