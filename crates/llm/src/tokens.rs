//! Best-effort token estimation.
//!
//! A chars/4 heuristic with per-message overhead; close enough for credit
//! reservation, which rounds up anyway. Exact counts come back from the
//! provider after the call.

use relay_domain::chat::ChatMessage;

/// Per-message formatting overhead (role markers, separators).
const PER_MESSAGE_OVERHEAD: u64 = 4;

pub fn estimate_text(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(if text.is_empty() { 0 } else { 1 })
}

pub fn estimate_messages(messages: &[ChatMessage]) -> u64 {
    messages
        .iter()
        .map(|m| {
            let tools: u64 = m
                .tool_calls
                .iter()
                .map(|tc| estimate_text(&tc.name) + estimate_text(&tc.arguments))
                .sum();
            estimate_text(&m.content) + tools + PER_MESSAGE_OVERHEAD
        })
        .sum()
}
