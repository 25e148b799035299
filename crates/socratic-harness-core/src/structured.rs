//! Best-effort structured decoding of model output.
//!
//! Chat completions asked for JSON often wrap it in prose or markdown
//! fences, or return something that is not JSON at all. Every call site
//! decodes through [`decode_object`] or [`decode_array`], which never fail:
//! they return a [`Decoded`] whose `ok` flag tells the caller whether to use
//! the value or its documented default.
//!
//! Span selection tries the greedy span from the first opening bracket to
//! the last closing one first, then the first balanced span.

use serde::de::DeserializeOwned;

/// Result of a best-effort decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    /// `false` when `value` is the default rather than parsed output.
    pub ok: bool,
}

impl<T> Decoded<T> {
    fn parsed(value: T) -> Self {
        Self { value, ok: true }
    }

    fn fallback(value: T) -> Self {
        Self { value, ok: false }
    }
}

/// Decode the first `{...}` span of `raw` into `T`, or `T::default()`.
pub fn decode_object<T: DeserializeOwned + Default>(raw: &str) -> Decoded<T> {
    match decode_span(raw, '{', '}') {
        Some(value) => Decoded::parsed(value),
        None => Decoded::fallback(T::default()),
    }
}

/// Decode the first `[...]` span of `raw` into `Vec<T>`, or an empty vec.
pub fn decode_array<T: DeserializeOwned>(raw: &str) -> Decoded<Vec<T>> {
    match decode_span(raw, '[', ']') {
        Some(value) => Decoded::parsed(value),
        None => Decoded::fallback(Vec::new()),
    }
}

fn decode_span<T: DeserializeOwned>(raw: &str, open: char, close: char) -> Option<T> {
    let greedy = greedy_span(raw, open, close)?;
    if let Ok(value) = serde_json::from_str(greedy) {
        return Some(value);
    }
    let balanced = balanced_span(raw, open, close)?;
    serde_json::from_str(balanced).ok()
}

/// Slice from the first `open` to the last `close`, inclusive.
pub fn greedy_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..end + close.len_utf8()])
}

/// Slice of the first bracket-balanced span starting at the first `open`.
/// Brackets inside JSON string literals are ignored.
pub fn balanced_span(raw: &str, open: char, close: char) -> Option<&str> {
    let start = raw.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let end = start + offset + c.len_utf8();
                return Some(&raw[start..end]);
            }
        }
    }
    None
}
