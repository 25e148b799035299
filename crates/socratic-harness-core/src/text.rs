//! Small lexical helpers shared by retrieval, analysis and evaluation.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

/// Lower-case `text` and split it on runs of non-word characters.
/// Empty fragments are dropped.
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    NON_WORD
        .split(&lower)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-folded set of the words in `text`.
pub fn word_set(text: &str) -> HashSet<String> {
    words(text).into_iter().collect()
}

/// Number of distinct words shared by `a` and `b`.
pub fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

/// Length in characters (not bytes).
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
