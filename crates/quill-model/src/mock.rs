// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic mock providers for tests.  No network access; each
//! `stream()`/`call()` pops the next pre-scripted response so tests can
//! specify exact event sequences, including tool calls.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    provider::{ModelProvider, ProviderError, ResponseStream},
    ChatCompletion, CompletedToolCall, CompletionRequest, FinishReason, ResponseEvent,
};

/// A pre-scripted mock provider.  The outer `Vec` is the ordered list of
/// calls; the inner `Vec` is the event sequence emitted for that call.
pub struct ScriptedMockProvider {
    scripts: Mutex<Vec<Vec<ResponseEvent>>>,
    /// When true, streams never terminate after their script is exhausted —
    /// they stay pending, which is how cancellation paths are exercised.
    hang_after_script: bool,
    /// Set to true when a handed-out stream is dropped.  Tests use this to
    /// assert that cancellation closes the underlying transport.
    pub transport_closed: Arc<AtomicBool>,
    /// The last request seen, for request-shape assertions.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            hang_after_script: false,
            transport_closed: Arc::new(AtomicBool::new(false)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Streams emit their script and then stay pending forever instead of
    /// terminating.  Use together with `transport_closed` to test that a
    /// cancelled consumer drops (closes) the stream.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    /// Convenience: provider that streams `reply` as two text deltas and a
    /// `stop` finish — the smallest realistic stream.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r: String = reply.into();
        let mid = r.len() / 2;
        let (a, b) = r.split_at(mid);
        Self::new(vec![vec![
            ResponseEvent::TextDelta(a.to_string()),
            ResponseEvent::TextDelta(b.to_string()),
            ResponseEvent::Finish(FinishReason::Stop),
            ResponseEvent::Done,
        ]])
    }

    /// Convenience: first call emits a tool call, second call emits text.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCallDelta {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Finish(FinishReason::ToolCalls),
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::Finish(FinishReason::Stop),
                ResponseEvent::Done,
            ],
        ])
    }

    fn next_script(&self, req: &CompletionRequest) -> Vec<ResponseEvent> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            vec![
                ResponseEvent::TextDelta("[script exhausted]".into()),
                ResponseEvent::Finish(FinishReason::Stop),
                ResponseEvent::Done,
            ]
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn call(&self, req: CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        let script = self.next_script(&req);
        let mut completion = ChatCompletion::default();
        let mut text = String::new();
        for ev in script {
            match ev {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::ToolCallDelta { id, name, arguments, .. } => {
                    completion.tool_calls.push(CompletedToolCall { id, name, arguments });
                }
                ResponseEvent::Finish(fr) => completion.finish_reason = Some(fr),
                ResponseEvent::Usage { input_tokens, output_tokens } => {
                    completion.input_tokens = input_tokens;
                    completion.output_tokens = output_tokens;
                }
                _ => {}
            }
        }
        if !text.is_empty() {
            completion.content = Some(text);
        }
        Ok(completion)
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ResponseStream, ProviderError> {
        let script = self.next_script(&req);
        Ok(Box::pin(GuardedStream {
            events: script.into_iter().collect(),
            hang_when_empty: self.hang_after_script,
            closed: Arc::clone(&self.transport_closed),
        }))
    }
}

/// Stream wrapper that flags `closed` on drop, mimicking a transport handle
/// that is torn down when the consumer cancels.
struct GuardedStream {
    events: std::collections::VecDeque<ResponseEvent>,
    hang_when_empty: bool,
    closed: Arc<AtomicBool>,
}

impl Stream for GuardedStream {
    type Item = Result<ResponseEvent, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.events.pop_front() {
            Some(ev) => Poll::Ready(Some(Ok(ev))),
            None if self.hang_when_empty => Poll::Pending,
            None => Poll::Ready(None),
        }
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A provider whose every request fails.  Used to test error paths and the
/// orchestrator's turn-abort behaviour.
pub struct FailingProvider {
    pub error_text: String,
}

#[async_trait]
impl ModelProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing-mock"
    }

    fn model_name(&self) -> &str {
        "failing-model"
    }

    async fn call(&self, _req: CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        Err(ProviderError::Fatal(self.error_text.clone()))
    }

    async fn stream(&self, _req: CompletionRequest) -> Result<ResponseStream, ProviderError> {
        Err(ProviderError::Fatal(self.error_text.clone()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_stream_replays_events_in_order() {
        let p = ScriptedMockProvider::always_text("Hello");
        let mut stream = p.stream(CompletionRequest::default()).await.unwrap();
        let mut text = String::new();
        while let Some(Ok(ev)) = stream.next().await {
            match ev {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn call_assembles_tool_calls() {
        let p = ScriptedMockProvider::tool_then_text("c1", "grep", "{}", "done");
        let c = p.call(CompletionRequest::default()).await.unwrap();
        assert_eq!(c.tool_calls.len(), 1);
        assert_eq!(c.tool_calls[0].name, "grep");
        assert_eq!(c.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn dropping_stream_marks_transport_closed() {
        let p = ScriptedMockProvider::always_text("x").hanging();
        let closed = Arc::clone(&p.transport_closed);
        let stream = p.stream(CompletionRequest::default()).await.unwrap();
        assert!(!closed.load(Ordering::SeqCst));
        drop(stream);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back_to_placeholder() {
        let p = ScriptedMockProvider::new(vec![]);
        let c = p.call(CompletionRequest::default()).await.unwrap();
        assert!(c.content.unwrap().contains("script exhausted"));
    }
}
