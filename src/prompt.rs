//! Prompt construction for answers, scope checks and follow-up suggestions.

use std::sync::OnceLock;

use rag_context_core::models::{RagContext, ScopeHints, Topic};
use regex::Regex;

use crate::llm::ChatMessage;

/// Messages for the main answer call.
pub fn answer_messages(question: &str, topic: Option<&Topic>, context: &RagContext) -> Vec<ChatMessage> {
    let mut system = String::from("You are a helpful research assistant.");

    if let Some(topic) = topic {
        system.push_str(&format!(
            " You answer questions about {}.",
            topic.name
        ));
        if let Some(description) = topic.description.as_deref().filter(|d| !d.is_empty()) {
            system.push_str(&format!(" Topic description: {}", description));
        }
    }

    if context.is_empty() {
        system.push_str(
            "\n\nNo relevant sources were found for this question. Answer from your general \
             knowledge and state clearly at the start of your answer that no sources were \
             found, so the answer is not backed by retrieved material. Do not invent citations.",
        );
    } else {
        system.push_str(
            "\n\nAnswer using the sources below. Cite every claim taken from a source with its \
             marker exactly as shown: [Document N] for document excerpts and [Web Source N] for \
             web results. Only use marker numbers that appear in the sources. If the sources do \
             not cover part of the question, say so.\n\n# Sources\n\n",
        );
        system.push_str(&context.formatted_text);
    }

    vec![ChatMessage::system(system), ChatMessage::user(question)]
}

/// Messages for the YES/NO topic classification call.
pub fn scope_messages(
    question: &str,
    topic_name: &str,
    topic_description: Option<&str>,
    hints: &ScopeHints,
) -> Vec<ChatMessage> {
    let mut prompt = format!("Topic: {}\n", topic_name);
    if let Some(description) = topic_description.filter(|d| !d.is_empty()) {
        prompt.push_str(&format!("Description: {}\n", description));
    }
    if !hints.keywords.is_empty() {
        prompt.push_str(&format!("Related keywords: {}\n", hints.keywords.join(", ")));
    }
    if !hints.subtopics.is_empty() {
        prompt.push_str(&format!("Subtopics: {}\n", hints.subtopics.join(", ")));
    }
    prompt.push_str(&format!(
        "\nQuestion: {}\n\nIs this question related to the topic? Answer with only YES or NO.",
        question
    ));

    vec![
        ChatMessage::system(
            "You classify whether a question falls within a topic. Reply with a single word: YES or NO.",
        ),
        ChatMessage::user(prompt),
    ]
}

/// Messages asking for follow-up questions after an answer.
pub fn follow_up_messages(question: &str, answer: &str, count: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Suggest {} short follow-up questions the user might ask next. \
             Reply with one question per line and nothing else.",
            count
        )),
        ChatMessage::user(format!("Question: {}\n\nAnswer: {}", question, answer)),
    ]
}

/// Parse a follow-up reply: one question per line, list numbering and
/// bullets stripped, blanks dropped, at most `max` kept.
pub fn parse_follow_ups(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(|line| strip_list_marker(line.trim()).trim().to_string())
        .filter(|line| !line.is_empty())
        .take(max)
        .collect()
}

/// Drop a leading `1.`, `2)`, `-`, `*` or `•`. Digits that are part of the
/// question itself stay.
fn strip_list_marker(line: &str) -> &str {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    match RE
        .get_or_init(|| Regex::new(r"^(?:\d+[.)]|[-*•])\s*").ok())
        .as_ref()
        .and_then(|re| re.find(line))
    {
        Some(marker) => &line[marker.end()..],
        None => line,
    }
}

pub fn refusal_message(topic_name: &str) -> String {
    format!(
        "I can only help with questions about {}. Your question appears to be outside that \
         topic, so I can't answer it here. Please ask something related to {}.",
        topic_name, topic_name
    )
}

pub fn refusal_follow_up(topic_name: &str) -> String {
    format!("What would you like to know about {}?", topic_name)
}
