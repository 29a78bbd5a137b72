//! Inline citation resolution.
//!
//! The generation model is told to cite sources as `[Document N]` or
//! `[Web Source N]`, optionally followed by `(url)`. [`resolve`] finds those
//! markers in the finished answer and maps each one to a position in the
//! same [`RagContext`] that produced the prompt.
//!
//! A marker whose number is outside its section stays in the text exactly
//! as written and produces no [`Citation`]. For valid markers the trailing
//! parenthesized URL is dropped from the cleaned text, since the citation
//! already carries the source.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Citation, RagContext, SourceType};

/// The URL may hold one level of balanced parentheses, as in
/// `https://en.wikipedia.org/wiki/Bank_(finance)`.
const MARKER_PATTERN: &str =
    r"\[(Document|Web Source) (\d+)\](?:\s*\((https?://(?:[^\s()]|\([^\s()]*\))+)\))?";

fn marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MARKER_PATTERN).ok()).as_ref()
}

/// Resolve citation markers in `answer` against `context`.
///
/// Returns the cleaned text and one [`Citation`] per valid marker, in
/// order of appearance. Offsets refer to the cleaned text.
pub fn resolve(answer: &str, context: &RagContext) -> (String, Vec<Citation>) {
    let Some(re) = marker_regex() else {
        return (answer.to_string(), Vec::new());
    };

    let mut clean = String::with_capacity(answer.len());
    let mut citations = Vec::new();
    let mut cursor = 0;

    for caps in re.captures_iter(answer) {
        let Some(whole) = caps.get(0) else { continue };
        let source_type = match &caps[1] {
            "Document" => SourceType::Document,
            _ => SourceType::Web,
        };
        let resolved = caps[2]
            .parse::<usize>()
            .ok()
            .and_then(|n| context.section_index(source_type, n).map(|idx| (n, idx)));

        clean.push_str(&answer[cursor..whole.start()]);
        match resolved {
            Some((number, source_index)) => {
                let marker = format!("{} {}", source_type.marker_label(), number);
                let start = clean.len();
                clean.push('[');
                clean.push_str(&marker);
                clean.push(']');
                citations.push(Citation {
                    marker,
                    source_type,
                    source_index,
                    text_offset_start: start,
                    text_offset_end: clean.len(),
                });
            }
            None => clean.push_str(whole.as_str()),
        }
        cursor = whole.end();
    }
    clean.push_str(&answer[cursor..]);

    (clean, citations)
}
