/// How a folded query matched a folded candidate.
///
/// Variants are declared best-first so the derived `Ord` can be used directly
/// as a ranking key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    /// `candidate == query`.
    Exact,
    /// `candidate` starts with `query`.
    Prefix,
    /// `query` occurs somewhere after the start of `candidate`.
    Substring,
}

/// Classifies a folded `candidate` against a folded, non-empty `query`.
///
/// Both sides must already be folded with [`fold_case`](crate::fold_case); this function does
/// not fold again so hot loops over many tokens stay allocation-free.
pub fn classify(query: &str, candidate: &str) -> Option<MatchKind> {
    if query.is_empty() {
        return None;
    }
    if candidate.len() < query.len() {
        return None;
    }
    if candidate == query {
        return Some(MatchKind::Exact);
    }
    if candidate.starts_with(query) {
        return Some(MatchKind::Prefix);
    }
    if candidate.contains(query) {
        return Some(MatchKind::Substring);
    }
    None
}
