//! Greedy size-bounded batching of short texts
//!
//! Sizes are counted in characters. Every entry is charged its own length
//! plus one separator, so a batch whose accounted size is at most
//! `max_batch_size` joins into a string of at most `max_batch_size` characters.
//! Texts longer than the limit are cut into chunks that carry the index of
//! the text they came from, which lets callers stitch results back together.

use crate::core::models::char_len;

/// Joins the segments of one remote request
pub const TEXT_SEPARATOR: &str = "♧¥";

/// Joins all tags of one item into a single cache entry
pub const TAG_SEPARATOR: &str = "{";

/// A piece of input text bound for a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position of the source text in the caller's list
    pub index: usize,
    pub text: String,
}

/// Group texts into batches, dropping the origin indices
pub fn create_batches(texts: &[String], max_batch_size: usize) -> Vec<Vec<String>> {
    create_segment_batches(texts, max_batch_size)
        .into_iter()
        .map(|batch| batch.into_iter().map(|s| s.text).collect())
        .collect()
}

/// Group texts into batches of segments, keeping input order
pub fn create_segment_batches(texts: &[String], max_batch_size: usize) -> Vec<Vec<Segment>> {
    let separator_len = char_len(TEXT_SEPARATOR);
    let chunk_size = max_batch_size.saturating_sub(separator_len).max(1);

    let mut batches = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut current_size = 0usize;

    for (index, text) in texts.iter().enumerate() {
        let text_size = char_len(text);

        if text_size > max_batch_size {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_size = 0;
            }

            for chunk in chunk_chars(text, chunk_size) {
                let chunk_size = char_len(&chunk);
                if !current.is_empty() && current_size + chunk_size + separator_len > max_batch_size {
                    batches.push(std::mem::take(&mut current));
                    current_size = 0;
                }
                current.push(Segment { index, text: chunk });
                current_size += chunk_size + separator_len;
            }
        } else {
            if !current.is_empty() && current_size + text_size + separator_len > max_batch_size {
                batches.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current.push(Segment {
                index,
                text: text.clone(),
            });
            current_size += text_size + separator_len;
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Split a string into pieces of at most `size` characters
pub fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Encode a batch as one request string
pub fn join_batch<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(TEXT_SEPARATOR)
}

/// Decode a joined translation; `None` when the segment count does not match
pub fn split_joined(joined: &str, expected: usize) -> Option<Vec<String>> {
    let parts: Vec<String> = joined.split(TEXT_SEPARATOR).map(str::to_string).collect();
    (parts.len() == expected).then_some(parts)
}
