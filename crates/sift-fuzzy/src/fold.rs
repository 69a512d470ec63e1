use std::borrow::Cow;

#[cfg(feature = "unicode")]
use unicode_casefold::UnicodeCaseFold;
#[cfg(feature = "unicode")]
use unicode_normalization::UnicodeNormalization;

/// Folds `input` for case-insensitive comparison.
///
/// Borrows when the input is already folded, which is the common case for
/// index tokens.
pub fn fold_case(input: &str) -> Cow<'_, str> {
    if input.is_ascii() {
        if input.bytes().any(|b| b.is_ascii_uppercase()) {
            return Cow::Owned(input.to_ascii_lowercase());
        }
        return Cow::Borrowed(input);
    }

    Cow::Owned(fold_non_ascii(input))
}

#[cfg(not(feature = "unicode"))]
fn fold_non_ascii(input: &str) -> String {
    input.to_lowercase()
}

#[cfg(feature = "unicode")]
fn fold_non_ascii(input: &str) -> String {
    input.nfkc().case_fold().collect()
}

/// Returns `true` if folding `input` would not change it.
pub fn is_folded(input: &str) -> bool {
    fold_case(input) == input
}

/// Trims and folds raw user input.
///
/// Returns `None` when nothing is left after trimming; callers treat that as
/// the empty-query no-op rather than an error.
pub fn normalize_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(fold_case(trimmed).into_owned())
}

/// Returns the first `char` of `input` after folding.
pub fn first_folded_char(input: &str) -> Option<char> {
    if input.is_ascii() {
        return input
            .as_bytes()
            .first()
            .map(|&b0| b0.to_ascii_lowercase() as char);
    }

    let first = input.chars().next()?;
    // Folding can expand a single char (`ß` -> `ss` with the unicode feature),
    // so fold the leading char on its own and keep the first output char.
    let mut buf = [0u8; 4];
    fold_case(first.encode_utf8(&mut buf)).chars().next()
}
