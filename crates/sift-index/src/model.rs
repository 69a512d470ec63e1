use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ShardError;

/// Partition key of a shard.
///
/// Derived from the first folded character of a token: ASCII alphanumerics map
/// to themselves and everything else (punctuation, `_`, non-ASCII letters)
/// shares the catch-all key [`ShardKey::OTHER`]. The mapping is total and
/// deterministic, so a token always lives in exactly one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey(char);

impl ShardKey {
    pub const OTHER: ShardKey = ShardKey('_');

    /// Normalizes an arbitrary character into a key.
    pub fn from_char(ch: char) -> Self {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            ShardKey(ch)
        } else {
            Self::OTHER
        }
    }

    /// Returns the shard owning `token`, or `None` for an empty token.
    pub fn for_token(token: &str) -> Option<Self> {
        sift_fuzzy::first_folded_char(token).map(Self::from_char)
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShardKey {
    type Err = String;

    /// Parses the canonical single-character form written by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) if ShardKey::from_char(ch).0 == ch => Ok(ShardKey(ch)),
            _ => Err(format!("`{s}` is not a shard key")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("target `{0}` has no `#anchor`")]
    MissingAnchor(String),
    #[error("target `{0}` has more than one `#`")]
    MultipleAnchors(String),
    #[error("target `{0}` has an empty page")]
    EmptyPage(String),
    #[error("target `{0}` has an empty anchor")]
    EmptyAnchor(String),
    #[error("target `{0}` contains whitespace")]
    Whitespace(String),
}

/// Navigation locator of an entry: `page#anchor`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    page: String,
    anchor: String,
}

impl Target {
    /// Parses `page#anchor`.
    ///
    /// A leading `../` (emitted by Doxygen because its search pages live one
    /// directory below the documentation root) is dropped from the page.
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        if raw.chars().any(char::is_whitespace) {
            return Err(TargetError::Whitespace(raw.to_owned()));
        }
        let Some((page, anchor)) = raw.split_once('#') else {
            return Err(TargetError::MissingAnchor(raw.to_owned()));
        };
        if anchor.contains('#') {
            return Err(TargetError::MultipleAnchors(raw.to_owned()));
        }
        let page = page.strip_prefix("../").unwrap_or(page);
        if page.is_empty() {
            return Err(TargetError::EmptyPage(raw.to_owned()));
        }
        if anchor.is_empty() {
            return Err(TargetError::EmptyAnchor(raw.to_owned()));
        }
        Ok(Self {
            page: page.to_owned(),
            anchor: anchor.to_owned(),
        })
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page, self.anchor)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::parse(s)
    }
}

/// What kind of page documents an entry.
///
/// Purely informational; matching and ranking never look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Namespace,
    Type,
    Group,
}

/// One documented symbol occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub display_name: String,
    /// Enclosing namespaces/types, outermost first.
    pub qualified_scope: Vec<String>,
    pub target: Target,
    /// Signature summary distinguishing overloads that share name and scope.
    pub overload: Option<String>,
    pub kind: Option<ScopeKind>,
}

impl IndexEntry {
    pub fn new(
        display_name: impl Into<String>,
        qualified_scope: impl IntoIterator<Item = impl Into<String>>,
        target: Target,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            qualified_scope: qualified_scope.into_iter().map(Into::into).collect(),
            target,
            overload: None,
            kind: None,
        }
    }

    pub fn with_overload(mut self, overload: impl Into<String>) -> Self {
        self.overload = Some(overload.into());
        self
    }

    pub fn with_kind(mut self, kind: ScopeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn scope_depth(&self) -> usize {
        self.qualified_scope.len()
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.qualified_scope, &self.display_name)
    }
}

/// `scope::scope::name`; just `name` for an empty scope.
pub fn qualified_name(scope: &[String], name: &str) -> String {
    let mut out = String::new();
    for segment in scope {
        out.push_str(segment);
        out.push_str("::");
    }
    out.push_str(name);
    out
}

/// Entries grouped under one normalized search token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    pub token: String,
    /// Generator order; stable but carries no ranking meaning.
    pub entries: Vec<IndexEntry>,
}

impl TokenBucket {
    pub fn new(token: impl Into<String>, entries: Vec<IndexEntry>) -> Self {
        Self {
            token: token.into(),
            entries,
        }
    }
}

/// An immutable, validated partition of the index.
#[derive(Debug, Clone)]
pub struct Shard {
    key: ShardKey,
    buckets: Vec<TokenBucket>,
    /// Token -> position in `buckets`, for prefix range scans.
    by_token: BTreeMap<String, usize>,
    /// Folded display name -> `(bucket, entry)` positions.
    by_name: BTreeMap<String, Vec<(usize, usize)>>,
}

impl Shard {
    /// Validates `buckets` as the content of shard `key`.
    ///
    /// Rejects empty, unfolded and duplicate tokens, tokens or entry names
    /// that belong to a different shard, and entries with an empty name or
    /// scope segment. Keeping every name in its own shard is what lets a
    /// prefix query consult a single shard.
    pub fn new(key: ShardKey, buckets: Vec<TokenBucket>) -> Result<Self, ShardError> {
        let mut by_token = BTreeMap::new();
        let mut by_name: BTreeMap<String, Vec<(usize, usize)>> = BTreeMap::new();

        for (idx, bucket) in buckets.iter().enumerate() {
            let token = bucket.token.as_str();
            let Some(owner) = ShardKey::for_token(token) else {
                return Err(ShardError::malformed(key, format!("empty token at bucket {idx}")));
            };
            if !sift_fuzzy::is_folded(token) {
                return Err(ShardError::malformed(
                    key,
                    format!("token `{token}` is not case-folded"),
                ));
            }
            if owner != key {
                return Err(ShardError::malformed(
                    key,
                    format!("token `{token}` belongs to shard `{owner}`"),
                ));
            }
            for (entry_idx, entry) in bucket.entries.iter().enumerate() {
                if entry.display_name.is_empty() {
                    return Err(ShardError::malformed(
                        key,
                        format!("entry with empty name under token `{token}`"),
                    ));
                }
                if let Some(home) = ShardKey::for_token(&entry.display_name).filter(|home| *home != key) {
                    return Err(ShardError::malformed(
                        key,
                        format!(
                            "entry `{}` under token `{token}` belongs to shard `{home}`",
                            entry.display_name
                        ),
                    ));
                }
                if entry.qualified_scope.iter().any(String::is_empty) {
                    return Err(ShardError::malformed(
                        key,
                        format!(
                            "entry `{}` under token `{token}` has an empty scope segment",
                            entry.display_name
                        ),
                    ));
                }
                by_name
                    .entry(sift_fuzzy::fold_case(&entry.display_name).into_owned())
                    .or_default()
                    .push((idx, entry_idx));
            }
            if by_token.insert(bucket.token.clone(), idx).is_some() {
                return Err(ShardError::malformed(key, format!("duplicate token `{token}`")));
            }
        }

        Ok(Self {
            key,
            buckets,
            by_token,
            by_name,
        })
    }

    pub fn key(&self) -> ShardKey {
        self.key
    }

    /// Buckets in generator order.
    pub fn buckets(&self) -> &[TokenBucket] {
        &self.buckets
    }

    pub fn bucket(&self, token: &str) -> Option<&TokenBucket> {
        self.by_token.get(token).map(|&idx| &self.buckets[idx])
    }

    /// Buckets whose token starts with `prefix`, in token order.
    pub fn prefix_buckets<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a TokenBucket> + 'a {
        self.by_token
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(token, _)| token.starts_with(prefix))
            .map(move |(_, &idx)| &self.buckets[idx])
    }

    /// Entries whose case-folded display name starts with `prefix`, with the
    /// bucket that holds them, in folded-name order.
    pub fn entries_with_name_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a TokenBucket, &'a IndexEntry)> + 'a {
        self.by_name
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(name, _)| name.starts_with(prefix))
            .flat_map(move |(_, positions)| {
                positions.iter().map(move |&(bucket, entry)| {
                    let bucket = &self.buckets[bucket];
                    (bucket, &bucket.entries[entry])
                })
            })
    }

    pub fn token_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.entries.len()).sum()
    }
}
