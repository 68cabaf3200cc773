// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Token-budget enforcement for the transcript.
//!
//! Two strategies, chosen by config:
//!
//! - **Sliding window**: keep the system message, drop oldest non-system
//!   messages until the count fits.  Tool-call groups are dropped whole so
//!   a request is never separated from its results.
//! - **Summarize-older**: when estimated tokens exceed
//!   `threshold × max_context_length`, keep the system message and the
//!   most recent `keep_recent` messages and replace the dropped span with
//!   one synthetic assistant summary produced by a blocking sub-call.
//!   Any summarization failure degrades to the sliding window.
//!
//! Token estimation is the chars/4 heuristic from the message model; both
//! strategies strictly shrink the transcript, so enforcement converges in
//! bounded steps.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use quill_config::{ContextConfig, ContextStrategy};
use quill_model::{CompletionRequest, Message, MessageContent, ModelProvider, Role};

const SUMMARIZE_PROMPT: &str = "\
Summarise the following conversation history in a concise, \
information-dense way. Preserve file paths, technical decisions, error \
messages and unfinished work; the summary replaces the original history.";

pub struct ContextManager {
    config: ContextConfig,
    max_context_length: usize,
    summarizer: Option<Arc<dyn ModelProvider>>,
}

impl ContextManager {
    pub fn new(
        config: ContextConfig,
        max_context_length: usize,
        summarizer: Option<Arc<dyn ModelProvider>>,
    ) -> Self {
        Self { config, max_context_length, summarizer }
    }

    /// Bring `messages` within budget, according to the configured strategy.
    pub async fn enforce(&self, messages: Vec<Message>) -> Vec<Message> {
        match self.config.strategy {
            ContextStrategy::SlidingWindow => {
                sliding_window(messages, self.config.window_size)
            }
            ContextStrategy::SummarizeOlder => self.summarize_older(messages).await,
        }
    }

    async fn summarize_older(&self, messages: Vec<Message>) -> Vec<Message> {
        let budget = (self.max_context_length as f32 * self.config.threshold) as usize;
        if estimated_tokens(&messages) <= budget {
            return messages;
        }

        let system: Option<Message> =
            messages.iter().find(|m| m.role == Role::System).cloned();
        let non_system: Vec<Message> =
            messages.iter().filter(|m| m.role != Role::System).cloned().collect();

        let keep = self.config.keep_recent.min(non_system.len());
        let mut split = non_system.len() - keep;
        // Pull the split back to a turn boundary: if it lands inside a
        // tool-call group, the recent tail would start with orphaned
        // results referencing summarised-away calls.
        while split > 0
            && matches!(
                non_system[split].content,
                MessageContent::ToolCall { .. } | MessageContent::ToolResult { .. }
            )
        {
            split -= 1;
        }
        if split == 0 {
            return sliding_window(messages, self.config.window_size);
        }

        let to_summarize = &non_system[..split];
        let recent = &non_system[split..];

        let Some(summarizer) = &self.summarizer else {
            return sliding_window(messages, self.config.window_size);
        };

        let request = CompletionRequest {
            messages: vec![
                Message::system(SUMMARIZE_PROMPT),
                Message::user(serialize_history(to_summarize)),
            ],
            stream: false,
            ..Default::default()
        };
        match summarizer.call(request).await {
            Ok(completion) => match completion.content {
                Some(summary) if !summary.is_empty() => {
                    let mut result = Vec::with_capacity(recent.len() + 2);
                    if let Some(sys) = system {
                        result.push(sys);
                    }
                    result.push(Message::assistant(format!(
                        "[Conversation summary]\n{summary}"
                    )));
                    result.extend_from_slice(recent);
                    result
                }
                _ => {
                    warn!("summarizer returned empty content, falling back to sliding window");
                    sliding_window(messages, self.config.window_size)
                }
            },
            Err(e) => {
                warn!("summarization failed, falling back to sliding window: {e}");
                sliding_window(messages, self.config.window_size)
            }
        }
    }
}

/// Estimated token footprint of a transcript.
pub fn estimated_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.approx_tokens()).sum()
}

/// Keep the system message, drop oldest non-system messages (whole
/// tool-call groups at a time) until the count fits `size`.
pub fn sliding_window(messages: Vec<Message>, size: usize) -> Vec<Message> {
    let mut messages = messages;
    while messages.len() > size.max(1) {
        // First droppable (non-system) message.
        let Some(idx) = messages.iter().position(|m| m.role != Role::System) else {
            break;
        };
        let group = group_len(&messages, idx);
        // Whatever happens, make progress.
        let drop_n = group.max(1);
        if messages.len() - drop_n < messages.iter().filter(|m| m.role == Role::System).count() {
            break;
        }
        messages.drain(idx..idx + drop_n);
    }
    messages
}

/// Length of the tool-call group starting at `idx`: consecutive ToolCall
/// messages plus their immediately following ToolResult messages.  A plain
/// message forms a group of one.
fn group_len(messages: &[Message], idx: usize) -> usize {
    let mut ids = HashSet::new();
    let mut end = idx;
    while end < messages.len() {
        match &messages[end].content {
            MessageContent::ToolCall { tool_call_id, .. } => {
                ids.insert(tool_call_id.clone());
                end += 1;
            }
            _ => break,
        }
    }
    if ids.is_empty() {
        // Not a tool-call: a bare result (already orphaned) or plain text.
        return 1;
    }
    while end < messages.len() {
        match &messages[end].content {
            MessageContent::ToolResult { tool_call_id, .. } if ids.contains(tool_call_id) => {
                end += 1;
            }
            _ => break,
        }
    }
    end - idx
}

/// Tool-call pairing invariant: every tool call id is answered by a later
/// tool result, and no result appears before (or without) its call.
pub fn validate_tool_pairing(messages: &[Message]) -> bool {
    let mut open: HashSet<String> = HashSet::new();
    let mut answered: HashSet<String> = HashSet::new();
    for m in messages {
        match &m.content {
            MessageContent::ToolCall { tool_call_id, .. } => {
                open.insert(tool_call_id.clone());
            }
            MessageContent::ToolResult { tool_call_id, .. } => {
                if !open.contains(tool_call_id) {
                    return false;
                }
                answered.insert(tool_call_id.clone());
            }
            _ => {}
        }
    }
    open == answered
}

fn serialize_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        match &m.content {
            MessageContent::Text(t) => {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                out.push_str(&format!("{role}: {t}\n"));
            }
            MessageContent::ToolCall { function, .. } => {
                out.push_str(&format!(
                    "assistant called {}({})\n",
                    function.name, function.arguments
                ));
            }
            MessageContent::ToolResult { content, .. } => {
                out.push_str(&format!("tool result: {content}\n"));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
