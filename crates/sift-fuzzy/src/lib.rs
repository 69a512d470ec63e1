//! Token normalization and match classification used by sift's index and
//! search layers.
//!
//! Every layer that compares a query against a search token must fold both
//! sides the same way, otherwise a token filed under one shard can become
//! unreachable from a query that "looks" identical. This crate is the single
//! place where that folding is defined.
//!
//! ## Folding
//!
//! - ASCII input takes a fast path: `A-Z` are lowered and everything else is
//!   kept byte-for-byte.
//! - Non-ASCII input is lowered with `char::to_lowercase`.
//! - With `feature = "unicode"`, non-ASCII input is instead NFKC-normalized
//!   and then case folded, so `"STRASSE"` and `"Straße"` fold to the same
//!   token.
//!
//! ## Matching
//!
//! [`classify`] compares an already-folded query against an already-folded
//! candidate and reports whether it is an [`MatchKind::Exact`],
//! [`MatchKind::Prefix`] or [`MatchKind::Substring`] hit.

#![forbid(unsafe_code)]

mod fold;
mod matching;

pub use fold::{first_folded_char, fold_case, is_folded, normalize_query};
pub use matching::{classify, MatchKind};
