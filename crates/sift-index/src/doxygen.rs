//! Importer for Doxygen `searchData` files (`html/search/functions_*.js`).
//!
//! The files are JavaScript array literals:
//!
//! ```text
//! var searchData=
//! [
//!   ['isallowed_1546',['isAllowed',['../classhermes_1_1SkymapMask.html#a83fb',1,'hermes::SkymapMask::isAllowed()'],...]],
//!   ...
//! ];
//! ```
//!
//! Each item is `[token_id, [display_name, [url, 1, scope_or_signature]...]]`.
//! Token ids carry a numeric `_NNNN` suffix and hex-escape everything that is
//! not alphanumeric (`_5f` is `_`); both are undone here so the resulting
//! tokens line up with [`ShardKey::for_token`](crate::ShardKey::for_token).

use std::collections::HashMap;

use crate::model::{IndexEntry, ScopeKind, Target, TargetError, TokenBucket};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("doxygen search data: {message} at byte {offset}")]
pub struct DoxygenError {
    pub offset: usize,
    pub message: String,
}

impl DoxygenError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num,
    Array(Vec<(usize, Value)>),
}

struct Reader<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            text,
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8) -> Result<(), DoxygenError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected `{}`", expected as char)))
        }
    }

    fn unexpected(&mut self, what: &str) -> DoxygenError {
        match self.peek() {
            Some(b) => DoxygenError::new(self.pos, format!("{what}, found `{}`", b as char)),
            None => DoxygenError::new(self.pos, format!("{what}, found end of input")),
        }
    }

    fn at_var(&mut self) -> bool {
        self.skip_ws();
        self.text[self.pos..].starts_with("var")
    }

    /// Skips an optional `var <ident> =` preamble.
    fn skip_preamble(&mut self) -> Result<(), DoxygenError> {
        if !self.at_var() {
            return Ok(());
        }
        let Some(eq) = self.text[self.pos..].find('=') else {
            return Err(DoxygenError::new(self.pos, "`var` declaration without `=`"));
        };
        self.pos += eq + 1;
        Ok(())
    }

    fn value(&mut self) -> Result<(usize, Value), DoxygenError> {
        self.skip_ws();
        let start = self.pos;
        let value = match self.peek() {
            Some(b'[') => self.array()?,
            Some(quote @ (b'\'' | b'"')) => Value::Str(self.string(quote)?),
            Some(b'-' | b'0'..=b'9') => {
                self.number()?;
                Value::Num
            }
            _ => return Err(self.unexpected("expected a string, number or array")),
        };
        Ok((start, value))
    }

    fn array(&mut self) -> Result<Value, DoxygenError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        loop {
            if self.eat(b']') {
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            if self.eat(b',') {
                continue;
            }
            self.expect(b']')?;
            return Ok(Value::Array(items));
        }
    }

    fn string(&mut self, quote: u8) -> Result<String, DoxygenError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chunk_start = self.pos;
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(DoxygenError::new(start, "unterminated string"));
            };
            if b == quote {
                out.push_str(&self.text[chunk_start..self.pos]);
                self.pos += 1;
                return Ok(out);
            }
            if b == b'\\' {
                out.push_str(&self.text[chunk_start..self.pos]);
                let Some(&escaped) = self.bytes.get(self.pos + 1) else {
                    return Err(DoxygenError::new(start, "unterminated string"));
                };
                match escaped {
                    b'n' => out.push('\n'),
                    b't' => out.push('\t'),
                    b'\\' | b'\'' | b'"' | b'/' => out.push(escaped as char),
                    other => {
                        return Err(DoxygenError::new(
                            self.pos,
                            format!("unsupported escape `\\{}`", other as char),
                        ))
                    }
                }
                self.pos += 2;
                chunk_start = self.pos;
                continue;
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), DoxygenError> {
        let start = self.pos;
        if self.bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        self.text[start..self.pos]
            .parse::<i64>()
            .map(drop)
            .map_err(|_| DoxygenError::new(start, "invalid number"))
    }
}

/// Parses Doxygen `searchData` into token buckets.
///
/// `text` may hold several `var searchData=[...];` statements back to back
/// (the sections of one letter, such as `all_9.js` and `functions_9.js`).
/// Items whose token ids collide once the numeric suffix is removed are
/// merged into one bucket, in file order.
pub fn parse_search_data(text: &str) -> Result<Vec<TokenBucket>, DoxygenError> {
    let mut reader = Reader::new(text);
    let mut items = Vec::new();
    loop {
        reader.skip_preamble()?;
        let (top_offset, top) = reader.value()?;
        let Value::Array(mut section) = top else {
            return Err(DoxygenError::new(top_offset, "search data is not an array"));
        };
        items.append(&mut section);
        reader.eat(b';');
        match reader.peek() {
            None => break,
            Some(b'[') => {}
            Some(_) if reader.at_var() => {}
            Some(_) => return Err(reader.unexpected("trailing content after search data")),
        }
    }

    let mut buckets: Vec<TokenBucket> = Vec::new();
    let mut by_token: HashMap<String, usize> = HashMap::new();

    for (offset, item) in items {
        let Some((token, entries)) = parse_item(offset, item)? else {
            continue;
        };
        match by_token.get(&token) {
            Some(&idx) => buckets[idx].entries.extend(entries),
            None => {
                by_token.insert(token.clone(), buckets.len());
                buckets.push(TokenBucket { token, entries });
            }
        }
    }

    Ok(buckets)
}

/// Returns `None` for items that only point at compound pages.
fn parse_item(offset: usize, item: Value) -> Result<Option<(String, Vec<IndexEntry>)>, DoxygenError> {
    let mut fields = into_array(offset, item, "search item")?.into_iter();

    let (id_offset, id) = next_field(offset, &mut fields, "token id")?;
    let token = decode_token_id(id_offset, &into_string(id_offset, id, "token id")?)?;

    let (group_offset, group) = next_field(offset, &mut fields, "entry list")?;
    let mut group = into_array(group_offset, group, "entry list")?.into_iter();

    let (name_offset, name) = next_field(group_offset, &mut group, "display name")?;
    let display_name = unescape_html(&into_string(name_offset, name, "display name")?);

    let mut targets = 0;
    let mut entries = Vec::new();
    for (target_offset, target) in group {
        targets += 1;
        entries.extend(parse_target(target_offset, target, &display_name)?);
    }
    if targets == 0 {
        return Err(DoxygenError::new(group_offset, "entry list has no targets"));
    }

    Ok((!entries.is_empty()).then_some((token, entries)))
}

/// Compound pages (`classhermes_1_1Grid.html`, files, namespaces) carry no
/// anchor and are skipped; only member targets become entries.
fn parse_target(offset: usize, value: Value, display_name: &str) -> Result<Option<IndexEntry>, DoxygenError> {
    let mut fields = into_array(offset, value, "target")?.into_iter();

    let (url_offset, url) = next_field(offset, &mut fields, "target url")?;
    let url = into_string(url_offset, url, "target url")?;
    let target = match Target::parse(&url) {
        Ok(target) => target,
        Err(TargetError::MissingAnchor(_)) => return Ok(None),
        Err(err) => return Err(DoxygenError::new(url_offset, err.to_string())),
    };

    // The second field is Doxygen's "is a link" flag; the third is optional.
    let (flag_offset, flag) = next_field(offset, &mut fields, "link flag")?;
    if flag != Value::Num {
        return Err(DoxygenError::new(flag_offset, "link flag is not a number"));
    }
    let scope_text = match fields.next() {
        Some((scope_offset, scope)) => unescape_html(&into_string(scope_offset, scope, "scope")?),
        None => String::new(),
    };

    let (qualified_scope, overload) = split_signature(&scope_text, display_name);
    let mut entry = IndexEntry {
        display_name: display_name.to_owned(),
        qualified_scope,
        target,
        overload,
        kind: None,
    };
    if let Some(kind) = scope_kind_for_page(entry.target.page()) {
        entry.kind = Some(kind);
    }
    Ok(Some(entry))
}

fn next_field(
    offset: usize,
    fields: &mut impl Iterator<Item = (usize, Value)>,
    what: &str,
) -> Result<(usize, Value), DoxygenError> {
    fields
        .next()
        .ok_or_else(|| DoxygenError::new(offset, format!("missing {what}")))
}

fn into_array(offset: usize, value: Value, what: &str) -> Result<Vec<(usize, Value)>, DoxygenError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(DoxygenError::new(offset, format!("{what} is not an array"))),
    }
}

fn into_string(offset: usize, value: Value, what: &str) -> Result<String, DoxygenError> {
    match value {
        Value::Str(s) => Ok(s),
        _ => Err(DoxygenError::new(offset, format!("{what} is not a string"))),
    }
}

/// `initcachetable_1529` -> `initcachetable`, `_5fpad_12` -> `_pad`.
fn decode_token_id(offset: usize, id: &str) -> Result<String, DoxygenError> {
    let base = match id.rsplit_once('_') {
        Some((base, suffix))
            if !base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => id,
    };

    let bytes = base.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok());
            match hex {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                None => {
                    return Err(DoxygenError::new(
                        offset,
                        format!("invalid escape in token id `{id}`"),
                    ))
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    let token = String::from_utf8(out)
        .map_err(|_| DoxygenError::new(offset, format!("token id `{id}` is not valid UTF-8")))?;
    if token.is_empty() {
        return Err(DoxygenError::new(offset, "empty token id"));
    }
    Ok(sift_fuzzy::fold_case(&token).into_owned())
}

/// Splits Doxygen's third target field into scope segments and an overload
/// discriminator.
///
/// The field is either a bare scope (`hermes::darkmatter`) or the symbol's
/// full signature (`hermes::Grid::interpolate()`,
/// `hermes::FreeFreeIntegrator::integrateOverLOS(const QDirection &iterdir) const override`).
fn split_signature(text: &str, display_name: &str) -> (Vec<String>, Option<String>) {
    let text = text.trim();
    if text.is_empty() {
        return (Vec::new(), None);
    }

    let call = format!("{display_name}(");
    let (scope, overload) = if let Some(idx) = find_qualified(text, &call) {
        let args = text[idx + display_name.len()..].trim();
        let overload = (args != "()").then(|| args.to_owned());
        (&text[..idx], overload)
    } else if let Some(scope) = text
        .strip_suffix(display_name)
        .and_then(|rest| rest.strip_suffix("::"))
    {
        (scope, None)
    } else {
        (text, None)
    };

    let scope = scope.trim_end_matches("::");
    (split_scope(scope), overload)
}

/// Finds `needle` where it starts a path segment (start of text or after `::`).
fn find_qualified(text: &str, needle: &str) -> Option<usize> {
    text.match_indices(needle)
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || text[..idx].ends_with("::"))
}

/// Splits `a::B<c::D>::e` at top-level `::` only.
fn split_scope(scope: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = scope.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' => depth += 1,
            b'>' | b')' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                segments.push(scope[start..i].trim().to_owned());
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    segments.push(scope[start..].trim().to_owned());
    segments.retain(|segment| !segment.is_empty());
    segments
}

fn scope_kind_for_page(page: &str) -> Option<ScopeKind> {
    if page.starts_with("group__") {
        Some(ScopeKind::Group)
    } else if page.starts_with("namespace") {
        Some(ScopeKind::Namespace)
    } else if ["class", "struct", "union"]
        .iter()
        .any(|prefix| page.starts_with(prefix))
    {
        Some(ScopeKind::Type)
    } else {
        None
    }
}

fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_owned();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
