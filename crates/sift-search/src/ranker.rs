//! Ordering, deduplication and grouping of match candidates.
//!
//! Ranking policy, highest first:
//!
//! 1. How the display name matched the query: exact, then prefix, then
//!    substring.
//! 2. Shallower scope first, so symbols in a top-level namespace surface
//!    ahead of deeply nested members with the same name.
//! 3. Display name, byte-wise.
//!
//! Token length, scope segments, target, overload and token break the
//! remaining ties, which makes the order total: identical input always
//! produces identical output.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use sift_fuzzy::MatchKind;
use sift_index::{ScopeKind, Target};

use crate::Candidate;

/// One target of a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub target: Target,
    pub overload: Option<String>,
    pub kind: Option<ScopeKind>,
}

/// One display row: every variant of a name within one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub display_name: String,
    pub qualified_scope: Vec<String>,
    /// Match class of the best variant.
    pub match_kind: MatchKind,
    /// In ranked order; never empty.
    pub variants: Vec<Variant>,
}

impl ResultRow {
    pub fn qualified_name(&self) -> String {
        sift_index::qualified_name(&self.qualified_scope, &self.display_name)
    }
}

/// Total order over candidates.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| a.entry.scope_depth().cmp(&b.entry.scope_depth()))
        .then_with(|| a.entry.display_name.cmp(&b.entry.display_name))
        .then_with(|| a.token_rank.cmp(&b.token_rank))
        .then_with(|| a.entry.qualified_scope.cmp(&b.entry.qualified_scope))
        .then_with(|| a.entry.target.cmp(&b.entry.target))
        .then_with(|| a.entry.overload.cmp(&b.entry.overload))
        .then_with(|| a.token.cmp(&b.token))
}

/// Sorts `candidates` by [`compare`] and drops duplicates.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(compare);
    dedupe(candidates)
}

/// Collapses entries sharing `(display_name, qualified_scope, target)`,
/// keeping the first occurrence. Entries that differ only by overload stay
/// distinct. Idempotent.
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|candidate| {
            seen.insert((
                candidate.entry.display_name.clone(),
                candidate.entry.qualified_scope.clone(),
                candidate.entry.target.clone(),
            ))
        })
        .collect()
}

/// Groups ranked candidates into rows, one per `(display_name, qualified_scope)`,
/// ordered by their best variant. A `limit` of `0` keeps every row.
pub fn group_rows(ranked: &[Candidate], limit: usize) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = Vec::new();
    let mut index: HashMap<(&str, &[String]), usize> = HashMap::new();

    for candidate in ranked {
        let entry = &candidate.entry;
        let variant = Variant {
            target: entry.target.clone(),
            overload: entry.overload.clone(),
            kind: entry.kind,
        };
        let key = (entry.display_name.as_str(), entry.qualified_scope.as_slice());
        match index.get(&key) {
            Some(&row) => rows[row].variants.push(variant),
            None => {
                index.insert(key, rows.len());
                rows.push(ResultRow {
                    display_name: entry.display_name.clone(),
                    qualified_scope: entry.qualified_scope.clone(),
                    match_kind: candidate.kind,
                    variants: vec![variant],
                });
            }
        }
    }

    if limit > 0 {
        rows.truncate(limit);
    }
    rows
}
