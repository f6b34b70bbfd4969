//! Splits a finished completion into display-sized pieces for paced emission.
//!
//! Lengths are counted in `char`s so multi-byte text (CJK in particular) is
//! never cut inside a code point. Concatenating the output always yields the
//! input exactly.

/// Characters that end a sentence. The terminator stays with the text before it.
pub const SENTENCE_TERMINATORS: [char; 6] = ['。', '！', '？', '!', '?', '\n'];

/// Splits `text` at sentence terminators. A run of terminators stays attached
/// to the sentence it closes, so `"wait!?"` is one segment.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if !SENTENCE_TERMINATORS.contains(&ch) {
            continue;
        }
        let end = idx + ch.len_utf8();
        match ranges.last_mut() {
            Some(last) if start == idx && last.1 == idx => last.1 = end,
            _ => ranges.push((start, end)),
        }
        start = end;
    }
    if start < text.len() {
        ranges.push((start, text.len()));
    }
    ranges.into_iter().map(|(s, e)| &text[s..e]).collect()
}

/// Groups sentences into chunks of roughly `target_len` chars.
///
/// Sentences accumulate in a buffer that is flushed whenever the next sentence
/// would bring it to `target_len` or beyond. A single sentence longer than
/// `2 * target_len` is cut into fixed `target_len`-wide slices instead. A
/// `target_len` of zero is treated as one.
pub fn chunk_text(text: &str, target_len: usize) -> Vec<String> {
    let target = target_len.max(1);
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffered = 0usize;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        if len > target * 2 {
            flush(&mut buffer, &mut buffered, &mut chunks);
            hard_slice(sentence, target, &mut chunks);
            continue;
        }
        if buffered + len >= target {
            flush(&mut buffer, &mut buffered, &mut chunks);
        }
        buffer.push_str(sentence);
        buffered += len;
    }
    flush(&mut buffer, &mut buffered, &mut chunks);
    chunks
}

fn flush(buffer: &mut String, buffered: &mut usize, chunks: &mut Vec<String>) {
    if !buffer.is_empty() {
        chunks.push(std::mem::take(buffer));
    }
    *buffered = 0;
}

fn hard_slice(segment: &str, width: usize, chunks: &mut Vec<String>) {
    let mut start = 0;
    for (count, (idx, _)) in segment.char_indices().enumerate() {
        if count > 0 && count % width == 0 {
            chunks.push(segment[start..idx].to_string());
            start = idx;
        }
    }
    if start < segment.len() {
        chunks.push(segment[start..].to_string());
    }
}
