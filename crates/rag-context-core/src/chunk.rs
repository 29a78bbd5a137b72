//! Sentence-boundary text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of roughly `target_tokens` each,
//! repeating up to `overlap_tokens` worth of whole sentences from the tail
//! of the previous chunk at the start of the next one.
//!
//! # Algorithm
//!
//! 1. Convert token counts to characters using a 4 chars/token ratio. All
//!    lengths are counted in chars, as [`estimate_tokens`] does, never bytes.
//! 2. Segment the text into sentences. A sentence ends after `.`, `!` or `?`
//!    followed by whitespace, after `。`, `！` or `？`, or after a newline;
//!    trailing whitespace belongs to the sentence it follows. Segments cover
//!    the text exactly.
//! 3. Sentences longer than the target are hard-split at the last
//!    whitespace before the limit (or at a char boundary if there is none).
//! 4. Greedily pack consecutive segments while the chunk stays within the
//!    target. A chunk never ends mid-sentence unless that sentence alone
//!    exceeds the target.
//! 5. The next chunk starts at the earliest trailing segment of the previous
//!    chunk whose span to the chunk end fits inside the overlap window, as
//!    long as the next unseen segment still fits after it.
//!
//! Chunk text is the exact byte range `[start_offset, end_offset)` of the
//! input, so the non-overlapping portions concatenate back to the original.
//!
//! # Example
//!
//! ```rust
//! use rag_context_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "Hello world. Second sentence.", 800, 100).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].start_offset, 0);
//! ```

use crate::error::EngineError;
use crate::models::Chunk;

/// Approximate characters-per-token ratio used for all budgeting.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_TARGET_TOKENS: usize = 800;
pub const DEFAULT_OVERLAP_TOKENS: usize = 100;

/// Estimate the token count of `text` (ceil of chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split `text` into overlapping, sentence-aligned chunks.
///
/// # Errors
///
/// Returns [`EngineError::EmptyInput`] if `text` contains only whitespace.
///
/// # Guarantees
///
/// - Input shorter than `target_tokens` yields exactly one chunk.
/// - Chunk indices are contiguous from 0.
/// - The first chunk starts at offset 0 and the last ends at `text.len()`.
/// - `overlap_tokens` is capped below `target_tokens` so every chunk makes
///   forward progress.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, EngineError> {
    if text.trim().is_empty() {
        return Err(EngineError::EmptyInput);
    }

    let target_tokens = target_tokens.max(1);
    let overlap_tokens = overlap_tokens.min(target_tokens - 1);
    let max_chars = target_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let segments = measure(
        text,
        sentence_spans(text)
            .into_iter()
            .flat_map(|span| split_oversized(text, span, max_chars)),
    );

    let mut chunks = Vec::new();
    let mut first = 0;

    while first < segments.len() {
        let start = &segments[first];
        let mut last = first;
        while last + 1 < segments.len() && segments[last + 1].char_end - start.char_start <= max_chars {
            last += 1;
        }
        let end = &segments[last];
        chunks.push(make_chunk(document_id, chunks.len(), text, start.start, end.end));

        if last + 1 >= segments.len() {
            break;
        }

        // Rewind into the previous chunk's tail, but never so far that the
        // next chunk cannot also take in the first unseen segment.
        let unseen_end = segments[last + 1].char_end;
        let mut next = last + 1;
        while next - 1 > first
            && end.char_end - segments[next - 1].char_start <= overlap_chars
            && unseen_end - segments[next - 1].char_start <= max_chars
        {
            next -= 1;
        }
        first = next;
    }

    Ok(chunks)
}

/// A contiguous byte range of the input plus its position in chars.
struct Segment {
    start: usize,
    end: usize,
    char_start: usize,
    char_end: usize,
}

fn measure(text: &str, spans: impl Iterator<Item = (usize, usize)>) -> Vec<Segment> {
    let mut chars = 0;
    spans
        .map(|(start, end)| {
            let char_start = chars;
            chars += text[start..end].chars().count();
            Segment {
                start,
                end,
                char_start,
                char_end: chars,
            }
        })
        .collect()
}

/// Segment `text` into contiguous sentence spans (byte ranges).
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let ends_sentence = matches!(ch, '\n' | '。' | '！' | '？')
            || (matches!(ch, '.' | '!' | '?')
                && chars.peek().map_or(true, |(_, next)| next.is_whitespace()));
        if !ends_sentence {
            continue;
        }
        let mut end = idx + ch.len_utf8();
        while let Some(&(ws_idx, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                break;
            }
            end = ws_idx + ws.len_utf8();
            chars.next();
        }
        spans.push((start, end));
        start = end;
    }

    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

/// Hard-split a span longer than `max_chars` chars at whitespace where
/// possible.
fn split_oversized(text: &str, (start, end): (usize, usize), max_chars: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;

    // `limit` is the byte offset of the first char past the allowance.
    while let Some((limit, _)) = text[piece_start..end].char_indices().nth(max_chars) {
        let window = &text[piece_start..limit + piece_start];
        let split = window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(pos, c)| pos + c.len_utf8())
            .unwrap_or(limit);
        pieces.push((piece_start, piece_start + split));
        piece_start += split;
    }

    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let slice = &text[start..end];
    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: slice.to_string(),
        start_offset: start,
        end_offset: end,
        estimated_token_count: estimate_tokens(slice),
    }
}
