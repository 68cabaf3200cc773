// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat-completions provider.
//!
//! Speaks the standard `/v1/chat/completions` wire format: JSON request
//! bodies, SSE streaming with `data:`-prefixed lines and a terminal
//! `data: [DONE]`.  Local servers (llama.cpp, vLLM, Ollama) and most hosted
//! gateways accept the same shape, so one driver covers them all.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use quill_config::{expand_env_vars, ModelConfig};

use crate::{
    build_wire_messages,
    provider::{ModelProvider, ProviderCaps, ProviderError, ResponseStream},
    ChatCompletion, CompletedToolCall, CompletionRequest, FinishReason, ResponseEvent,
};

pub struct OpenAiCompatProvider {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    request_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ModelConfig) -> Self {
        let base = cfg.base_url.trim_end_matches('/');
        Self {
            model: cfg.name.clone(),
            api_key: resolve_api_key(cfg),
            chat_url: format!("{base}/chat/completions"),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
            max_retries: cfg.max_retries,
            retry_base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let model = if req.model.is_empty() { &self.model } else { &req.model };
        let mut body = json!({
            "model": model,
            "messages": build_wire_messages(&req.messages),
            "stream": req.stream,
        });
        if let Some(mt) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = req.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if req.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    /// Issue the HTTP POST once, mapping transport and status failures into
    /// the retryable/fatal taxonomy.
    async fn post_once(&self, body: &Value, streaming: bool) -> Result<reqwest::Response, ProviderError> {
        let mut req = self.client.post(&self.chat_url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if !streaming {
            req = req.timeout(self.request_timeout);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.request_timeout.as_secs())
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status: status.as_u16(), body });
        }
        Ok(resp)
    }

    /// Retry loop: attempt N waits `base × N` before retrying.  Only
    /// retryable failures (transport, 5xx, timeout) re-enter the loop.
    async fn post_with_retry(
        &self,
        body: &Value,
        streaming: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(body, streaming).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * attempt;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "provider request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    let expanded = expand_env_vars(&cfg.api_key);
    if !expanded.is_empty() {
        return Some(expanded);
    }
    std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty())
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn caps(&self) -> ProviderCaps {
        ProviderCaps {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: false,
            supports_json_schema: true,
        }
    }

    async fn call(&self, mut req: CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        req.stream = false;
        let body = self.build_body(&req);
        debug!(model = %self.model, messages = req.messages.len(), "non-streaming completion");
        let resp = self.post_with_retry(&body, false).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(parse_completion(&v))
    }

    async fn stream(&self, mut req: CompletionRequest) -> Result<ResponseStream, ProviderError> {
        req.stream = true;
        let body = self.build_body(&req);
        debug!(model = %self.model, messages = req.messages.len(), "streaming completion");
        // Retries apply only up to here: once the response stream is handed
        // to the caller, a mid-stream failure surfaces as a stream error.
        let resp = self.post_with_retry(&body, true).await?;

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Maintain a line
        // buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent, ProviderError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ProviderError::Transport(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

// ─── SSE parsing ─────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line stays in `buf` so it can be extended by the
/// next TCP chunk.
pub(crate) fn drain_complete_sse_lines(
    buf: &mut String,
) -> Vec<Result<ResponseEvent, ProviderError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(Ok(ev));
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
/// Returns `None` for empty lines, comments, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<ResponseEvent> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(ResponseEvent::Done);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

fn parse_sse_chunk(v: &Value) -> Option<ResponseEvent> {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return Some(ResponseEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });
    }

    let choice = &v["choices"][0];

    if let Some(reason) = choice["finish_reason"].as_str() {
        if let Some(fr) = FinishReason::parse(reason) {
            return Some(ResponseEvent::Finish(fr));
        }
    }

    let delta = &choice["delta"];

    // Tool call delta — each SSE chunk carries at most one tool-call delta
    // in practice; the index routes accumulation in the orchestrator.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return Some(ResponseEvent::ToolCallDelta {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        });
    }

    let text = delta.get("content").and_then(|c| c.as_str()).unwrap_or("");
    if text.is_empty() {
        return None;
    }
    Some(ResponseEvent::TextDelta(text.to_string()))
}

/// Parse a complete (non-streaming) chat completion response body.
fn parse_completion(v: &Value) -> ChatCompletion {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| CompletedToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    ChatCompletion {
        content,
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().and_then(FinishReason::parse),
        input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
