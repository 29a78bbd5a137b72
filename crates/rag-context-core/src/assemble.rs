//! Merge, rank, budget and format retrieval results into a [`RagContext`].
//!
//! This is the pure half of context assembly. The application crate runs
//! both retrievers concurrently and hands their results to
//! [`build_context`].
//!
//! # Pipeline
//!
//! 1. Drop items scoring below `min_score`.
//! 2. Sort by score descending. On equal scores documents come before web
//!    results; the sort is stable otherwise.
//! 3. Deduplicate on `(source_type, id)`, keeping the best-ranked instance.
//! 4. Walk the ranked list accumulating `estimated_token_count`. The first
//!    item that would push the total over `max_context_tokens` is dropped
//!    together with everything after it.
//! 5. Format the survivors: a document section (`[Document N] <title>`)
//!    followed by a web section (`[Web Source N] <title> (<url>)`), each
//!    numbered from 1 in rank order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::models::{RagContext, RetrievedItem, SourceType};

const DOCUMENT_SECTION_HEADER: &str = "## Document Excerpts";
const WEB_SECTION_HEADER: &str = "## Web Results";

/// Result of applying the token budget to a ranked list.
#[derive(Debug, Clone, PartialEq)]
pub struct Budgeted {
    pub items: Vec<RetrievedItem>,
    pub used_tokens: usize,
    pub truncated: bool,
}

/// Filter, rank and deduplicate the results of both retrievers.
pub fn merge_ranked(
    document_items: Vec<RetrievedItem>,
    web_items: Vec<RetrievedItem>,
    min_score: f64,
) -> Vec<RetrievedItem> {
    let mut merged: Vec<RetrievedItem> = document_items
        .into_iter()
        .chain(web_items)
        .filter(|item| item.score >= min_score)
        .collect();

    merged.sort_by(compare_rank);

    let mut seen: HashSet<(SourceType, String)> = HashSet::new();
    merged.retain(|item| seen.insert((item.source_type, item.id.clone())));
    merged
}

/// Rank order: higher score first, documents before web on ties.
fn compare_rank(a: &RetrievedItem, b: &RetrievedItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| source_priority(a.source_type).cmp(&source_priority(b.source_type)))
}

fn source_priority(source_type: SourceType) -> u8 {
    match source_type {
        SourceType::Document => 0,
        SourceType::Web => 1,
    }
}

/// Keep the longest prefix of `ranked` that fits within `max_context_tokens`.
pub fn apply_budget(ranked: Vec<RetrievedItem>, max_context_tokens: usize) -> Budgeted {
    let total = ranked.len();
    let mut used_tokens = 0;
    let mut items = Vec::with_capacity(total);

    for item in ranked {
        if used_tokens + item.estimated_token_count > max_context_tokens {
            break;
        }
        used_tokens += item.estimated_token_count;
        items.push(item);
    }

    let truncated = items.len() < total;
    Budgeted {
        items,
        used_tokens,
        truncated,
    }
}

/// Render the prompt context block for a budgeted, rank-ordered item list.
///
/// Returns an empty string when `items` is empty.
pub fn format_context(items: &[RetrievedItem]) -> String {
    let mut out = String::new();

    let documents: Vec<&RetrievedItem> = items
        .iter()
        .filter(|i| i.source_type == SourceType::Document)
        .collect();
    let web: Vec<&RetrievedItem> = items
        .iter()
        .filter(|i| i.source_type == SourceType::Web)
        .collect();

    if !documents.is_empty() {
        out.push_str(DOCUMENT_SECTION_HEADER);
        out.push_str("\n\n");
        for (n, item) in documents.iter().enumerate() {
            let _ = writeln!(out, "[Document {}] {}", n + 1, item.title);
            let _ = writeln!(out, "{}\n", item.snippet.trim());
        }
    }

    if !web.is_empty() {
        out.push_str(WEB_SECTION_HEADER);
        out.push_str("\n\n");
        for (n, item) in web.iter().enumerate() {
            let url = item.url.as_deref().unwrap_or(item.id.as_str());
            let _ = writeln!(out, "[Web Source {}] {} ({})", n + 1, item.title, url);
            let _ = writeln!(out, "{}\n", item.snippet.trim());
        }
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out
}

/// Run the full merge → budget → format pipeline.
pub fn build_context(
    document_items: Vec<RetrievedItem>,
    web_items: Vec<RetrievedItem>,
    min_score: f64,
    max_context_tokens: usize,
) -> RagContext {
    let ranked = merge_ranked(document_items, web_items, min_score);
    let budgeted = apply_budget(ranked, max_context_tokens);
    let formatted_text = format_context(&budgeted.items);

    RagContext {
        items: budgeted.items,
        formatted_text,
        used_token_budget: budgeted.used_tokens,
        truncated: budgeted.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, score: f64, tokens: usize) -> RetrievedItem {
        RetrievedItem::document(
            format!("{}:0", id),
            id,
            format!("Title {}", id),
            format!("text of {}", id),
            score,
            tokens,
        )
    }

    fn web(url: &str, score: f64, tokens: usize) -> RetrievedItem {
        RetrievedItem::web(url, format!("Page {}", url), "web snippet", score, tokens)
    }

    #[test]
    fn test_min_score_filters() {
        let merged = merge_ranked(
            vec![doc("a", 0.9, 10), doc("b", 0.65, 10), doc("c", 0.3, 10)],
            Vec::new(),
            0.7,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "a:0");
    }

    #[test]
    fn test_sorted_desc_documents_win_ties() {
        let merged = merge_ranked(
            vec![doc("a", 0.8, 10), doc("b", 0.95, 10)],
            vec![web("https://w.example", 0.8, 10), web("https://v.example", 0.99, 10)],
            0.0,
        );
        let ids: Vec<&str> = merged.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["https://v.example", "b:0", "a:0", "https://w.example"]
        );
    }

    #[test]
    fn test_duplicate_web_url_merged_once() {
        let merged = merge_ranked(
            Vec::new(),
            vec![
                web("https://x.com/a", 0.8, 10),
                web("https://x.com/a", 0.9, 10),
            ],
            0.0,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].score, 0.9);
    }

    #[test]
    fn test_same_id_different_source_types_kept() {
        let mut d = doc("x", 0.8, 10);
        d.id = "shared".to_string();
        let mut w = web("https://y", 0.8, 10);
        w.id = "shared".to_string();
        assert_eq!(merge_ranked(vec![d], vec![w], 0.0).len(), 2);
    }

    #[test]
    fn test_budget_drops_tail_from_first_overflow() {
        let ranked = vec![doc("a", 0.9, 40), doc("b", 0.8, 50), doc("c", 0.7, 5)];
        let b = apply_budget(ranked, 60);
        assert_eq!(b.items.len(), 1);
        assert_eq!(b.used_tokens, 40);
        assert!(b.truncated);
    }

    #[test]
    fn test_budget_exact_fit_not_truncated() {
        let b = apply_budget(vec![doc("a", 0.9, 30), doc("b", 0.8, 30)], 60);
        assert_eq!(b.items.len(), 2);
        assert_eq!(b.used_tokens, 60);
        assert!(!b.truncated);
    }

    #[test]
    fn test_budget_never_exceeded() {
        for max in [0usize, 1, 7, 15, 33, 100, 1000] {
            let ranked: Vec<RetrievedItem> = (0..20)
                .map(|i| doc(&format!("d{}", i), 0.9, (i * 7) % 13 + 1))
                .collect();
            let b = apply_budget(ranked, max);
            assert!(b.used_tokens <= max, "max={} used={}", max, b.used_tokens);
        }
    }

    #[test]
    fn test_format_sections_and_numbering() {
        let items = vec![
            web("https://w1.example", 0.95, 5),
            doc("a", 0.9, 5),
            web("https://w2.example", 0.85, 5),
            doc("b", 0.8, 5),
        ];
        let text = format_context(&items);
        let doc_pos = text.find("[Document 1] Title a").unwrap();
        let doc2_pos = text.find("[Document 2] Title b").unwrap();
        let web_pos = text
            .find("[Web Source 1] Page https://w1.example (https://w1.example)")
            .unwrap();
        assert!(text.contains("[Web Source 2] Page https://w2.example (https://w2.example)"));
        assert!(doc_pos < doc2_pos);
        assert!(doc2_pos < web_pos);
        assert!(text.starts_with(DOCUMENT_SECTION_HEADER));
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_build_context_empty_is_valid() {
        let ctx = build_context(vec![doc("a", 0.2, 5)], Vec::new(), 0.7, 100);
        assert!(ctx.is_empty());
        assert!(ctx.formatted_text.is_empty());
        assert_eq!(ctx.used_token_budget, 0);
        assert!(!ctx.truncated);
    }

    #[test]
    fn test_build_context_numbering_matches_section_index() {
        let ctx = build_context(
            vec![doc("a", 0.9, 5), doc("b", 0.7, 5)],
            vec![web("https://w.example", 0.8, 5)],
            0.0,
            100,
        );
        let second_doc = ctx.section_index(SourceType::Document, 2).unwrap();
        assert_eq!(ctx.items[second_doc].id, "b:0");
        assert!(ctx.formatted_text.contains("[Document 2] Title b"));
    }
}
