//! Boundary-aware text chunker.
//!
//! Splits extracted document text into segments sized for embedding,
//! preferring paragraph boundaries, then sentence boundaries, then word
//! boundaries.
//!
//! # Algorithm
//!
//! 1. Convert token bounds to character bounds using 4 chars/token.
//! 2. Split text on blank lines into paragraphs.
//! 3. Accumulate paragraphs into a buffer; when the next one would push the
//!    buffer past `max_chars`, flush the buffer and start over with it.
//! 4. A paragraph longer than `max_chars` is split into sentences (`.`, `!`
//!    or `?` followed by whitespace) with the same accumulate/flush loop.
//! 5. A sentence longer than `max_chars` is split into words; a single word
//!    longer than `max_chars` is hard-split on character boundaries.
//! 6. A flushed chunk shorter than `min_chars` is merged into the previous
//!    chunk when the result still fits; a short previous chunk likewise
//!    absorbs the next one. Otherwise the short chunk is kept as-is.
//!
//! Only whitespace is ever dropped or inserted, so the non-whitespace
//! characters of the input survive exactly once and in order.
//!
//! # Example
//!
//! ```rust
//! use socratic_harness_core::chunk::TextChunker;
//!
//! let chunks = TextChunker::default().chunk("Hello world.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["Hello world.\n\nSecond paragraph."]);
//! ```

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::text::char_len;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default lower bound, in tokens.
pub const MIN_CHUNK_TOKENS: usize = 200;

/// Default upper bound, in tokens.
pub const MAX_CHUNK_TOKENS: usize = 500;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Chunk size bounds expressed in tokens.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingParams {
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            min_tokens: MIN_CHUNK_TOKENS,
            max_tokens: MAX_CHUNK_TOKENS,
        }
    }
}

/// Splits text into bounded, coherent segments.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    min_chars: usize,
    max_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkingParams::default())
    }
}

impl TextChunker {
    pub fn new(params: ChunkingParams) -> Self {
        Self::with_char_bounds(
            params.min_tokens * CHARS_PER_TOKEN,
            params.max_tokens * CHARS_PER_TOKEN,
        )
    }

    /// Build a chunker from explicit character bounds.
    ///
    /// `max_chars` is raised to at least 1 and `min_chars` capped at it.
    pub fn with_char_bounds(min_chars: usize, max_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            min_chars: min_chars.min(max_chars),
            max_chars,
        }
    }

    pub fn min_chars(&self) -> usize {
        self.min_chars
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split `text` into chunks. Blank input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let mut sink = ChunkSink::new(self.min_chars, self.max_chars);
        if text.trim().is_empty() {
            return sink.chunks;
        }

        let paragraphs = BLANK_LINE
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty());

        self.accumulate(paragraphs, PARAGRAPH_SEP, &mut sink, |para, sink| {
            self.split_paragraph(para, sink)
        });

        sink.chunks
    }

    /// Rough token estimate for a chunk.
    pub fn estimate_tokens(text: &str) -> usize {
        char_len(text).div_ceil(CHARS_PER_TOKEN)
    }

    /// Accumulate `units` into buffers no longer than `max_chars`, handing
    /// any single unit that is itself too long to `oversized`.
    fn accumulate<'a, I, F>(&self, units: I, sep: &str, sink: &mut ChunkSink, mut oversized: F)
    where
        I: Iterator<Item = &'a str>,
        F: FnMut(&'a str, &mut ChunkSink),
    {
        let sep_len = char_len(sep);
        let mut buf = String::new();
        let mut buf_len = 0usize;

        for unit in units {
            let len = char_len(unit);
            if len > self.max_chars {
                sink.save(&buf);
                buf.clear();
                buf_len = 0;
                oversized(unit, sink);
                continue;
            }

            if buf.is_empty() {
                buf.push_str(unit);
                buf_len = len;
            } else if buf_len + sep_len + len > self.max_chars {
                sink.save(&buf);
                buf.clear();
                buf.push_str(unit);
                buf_len = len;
            } else {
                buf.push_str(sep);
                buf.push_str(unit);
                buf_len += sep_len + len;
            }
        }

        sink.save(&buf);
    }

    fn split_paragraph(&self, paragraph: &str, sink: &mut ChunkSink) {
        let sentences = split_sentences(paragraph);
        self.accumulate(sentences.into_iter(), SENTENCE_SEP, sink, |sentence, sink| {
            self.split_sentence(sentence, sink)
        });
    }

    fn split_sentence(&self, sentence: &str, sink: &mut ChunkSink) {
        self.accumulate(
            sentence.split_whitespace(),
            SENTENCE_SEP,
            sink,
            |word, sink| {
                for piece in hard_split(word, self.max_chars) {
                    sink.save(piece);
                }
            },
        );
    }
}

/// Split on `.`, `!` or `?` followed by whitespace, keeping the punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split a single over-long word into pieces of at most `max_chars` characters.
fn hard_split(word: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in word.char_indices() {
        if count == max_chars {
            pieces.push(&word[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < word.len() {
        pieces.push(&word[start..]);
    }
    pieces
}

/// Collects flushed chunks and applies the small-chunk merge policy.
struct ChunkSink {
    min_chars: usize,
    max_chars: usize,
    chunks: Vec<String>,
    lens: Vec<usize>,
}

impl ChunkSink {
    fn new(min_chars: usize, max_chars: usize) -> Self {
        Self {
            min_chars,
            max_chars,
            chunks: Vec::new(),
            lens: Vec::new(),
        }
    }

    fn save(&mut self, text: &str) {
        let cleaned = text.trim();
        if cleaned.is_empty() {
            return;
        }
        let len = char_len(cleaned);
        let sep_len = char_len(PARAGRAPH_SEP);

        if let (Some(last), Some(last_len)) = (self.chunks.last_mut(), self.lens.last_mut()) {
            let fits = *last_len + sep_len + len <= self.max_chars;
            let either_small = len < self.min_chars || *last_len < self.min_chars;
            if fits && either_small {
                last.push_str(PARAGRAPH_SEP);
                last.push_str(cleaned);
                *last_len += sep_len + len;
                return;
            }
        }

        self.chunks.push(cleaned.to_string());
        self.lens.push(len);
    }
}

/// SHA-256 hex digest of chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn paragraph(words: usize, seed: &str) -> String {
        (0..words)
            .map(|i| format!("{}{}", seed, i % 10))
            .collect::<Vec<_>>()
            .join(" ")
            + "."
    }

    #[test]
    fn test_empty_and_blank_text() {
        let chunker = TextChunker::default();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n \t ").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = TextChunker::default().chunk("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_three_paragraphs_that_fit_merge_into_one() {
        let text = "First paragraph.\n\nSecond paragraph.\n  \nThird paragraph.";
        let chunks = TextChunker::default().chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0],
            "First paragraph.\n\nSecond paragraph.\n\nThird paragraph."
        );
    }

    #[test]
    fn test_paragraphs_exceeding_max_are_flushed() {
        let chunker = TextChunker::with_char_bounds(800, 2000);
        let paras: Vec<String> = (0..3).map(|i| paragraph(150, &format!("p{}w", i))).collect();
        let text = paras.join("\n\n");
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(char_len(c) <= 2000, "chunk too long: {}", char_len(c));
        }
        assert_eq!(non_ws(&chunks.concat()), non_ws(&text));
    }

    #[test]
    fn test_long_paragraph_splits_on_sentences() {
        let chunker = TextChunker::with_char_bounds(10, 40);
        let text = "The cat sat. The dog ran far away! Did the bird fly? Yes it did.";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(char_len(c) <= 40);
        }
        assert!(chunks[0].starts_with("The cat sat."));
        assert_eq!(non_ws(&chunks.concat()), non_ws(text));
    }

    #[test]
    fn test_long_sentence_splits_on_words() {
        let chunker = TextChunker::with_char_bounds(5, 20);
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        let chunks = chunker.chunk(text);
        for c in &chunks {
            assert!(char_len(c) <= 20, "{:?}", c);
        }
        assert_eq!(non_ws(&chunks.concat()), non_ws(text));
    }

    #[test]
    fn test_giant_word_is_hard_split() {
        let chunker = TextChunker::with_char_bounds(2, 8);
        let text = "ééééééééééééééééééééé";
        let chunks = chunker.chunk(text);
        for c in &chunks {
            assert!(char_len(c) <= 8);
        }
        assert_eq!(non_ws(&chunks.concat()), text);
    }

    #[test]
    fn test_small_trailing_chunk_merges_backward() {
        let chunker = TextChunker::with_char_bounds(20, 60);
        let big = "a".repeat(30);
        let text = format!("{}\n\n{}\n\ntiny", big, "b".repeat(30));
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].ends_with("tiny"));
    }

    #[test]
    fn test_small_leading_chunk_absorbs_next() {
        let chunker = TextChunker::with_char_bounds(20, 60);
        let text = format!("intro\n\n{}\n\n{}", "x".repeat(40), "y".repeat(40));
        let chunks = chunker.chunk(&text);
        assert!(chunks[0].starts_with("intro"));
        assert!(chunks.iter().filter(|c| char_len(c) < 20).count() <= 1);
    }

    #[test]
    fn test_unmergeable_fragment_kept() {
        let chunker = TextChunker::with_char_bounds(20, 30);
        let text = format!("{}\n\nend", "z".repeat(29));
        let chunks = chunker.chunk(&text);
        assert_eq!(chunks, vec!["z".repeat(29), "end".to_string()]);
    }

    #[test]
    fn test_bounds_and_content_preserved_on_realistic_text() {
        let chunker = TextChunker::default();
        let text = (0..40)
            .map(|i| paragraph(20 + (i * 7) % 60, &format!("t{}", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunker.chunk(&text);
        for c in &chunks {
            assert!(char_len(c) <= chunker.max_chars());
        }
        let small = chunks
            .iter()
            .filter(|c| char_len(c) < chunker.min_chars())
            .count();
        assert!(small <= 1, "{} small chunks", small);
        assert_eq!(non_ws(&chunks.concat()), non_ws(&text));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let chunker = TextChunker::with_char_bounds(2, 12);
        assert_eq!(chunker.chunk(text), chunker.chunk(text));
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(TextChunker::estimate_tokens(""), 0);
        assert_eq!(TextChunker::estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
