// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session request/response logging.
//!
//! Non-streaming calls are logged as one record.  Streaming responses are
//! accumulated keyed by a hash of the request's message list and written
//! as a single combined record when the finish reason arrives, so the log
//! stays one-line-per-exchange even though chunks trickle in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use quill_model::{ChatCompletion, CompletionRequest, FinishReason, ResponseEvent};

use crate::advisor::Advisor;

#[derive(Default)]
struct StreamAccum {
    model: String,
    message_count: usize,
    content: String,
    tool_call_names: Vec<String>,
    finish_reason: Option<FinishReason>,
}

pub struct RequestLogAdvisor {
    log_path: PathBuf,
    /// Streams in flight, keyed by request hash.  The orchestrator drives
    /// one stream at a time, but keying by hash keeps records correct if a
    /// retried request overlaps a finishing one.
    streams: Mutex<HashMap<String, StreamAccum>>,
    current: Mutex<Option<String>>,
}

impl RequestLogAdvisor {
    /// Logs to `<log_dir>/<session_id>.jsonl`.
    pub fn new(log_dir: PathBuf, session_id: &str) -> Self {
        Self {
            log_path: log_dir.join(format!("{session_id}.jsonl")),
            streams: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    fn request_hash(req: &CompletionRequest) -> String {
        let mut hasher = Sha256::new();
        for m in &req.messages {
            if let Ok(bytes) = serde_json::to_vec(m) {
                hasher.update(&bytes);
            }
        }
        hex::encode(&hasher.finalize()[..8])
    }

    fn append_record(&self, record: serde_json::Value) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            writeln!(file, "{record}")
        };
        if let Err(e) = write() {
            warn!(path = %self.log_path.display(), "request log write failed: {e}");
        }
    }
}

#[async_trait]
impl Advisor for RequestLogAdvisor {
    fn name(&self) -> &str {
        "request-log"
    }

    async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
        *self.current.lock().expect("log lock") = Some(Self::request_hash(&req));
        req
    }

    async fn after_call(&self, resp: ChatCompletion) -> ChatCompletion {
        let hash = self.current.lock().expect("log lock").take().unwrap_or_default();
        self.append_record(json!({
            "at": Utc::now().to_rfc3339(),
            "kind": "call",
            "request": hash,
            "content": resp.content,
            "tool_calls": resp.tool_calls.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
            "finish_reason": resp.finish_reason,
        }));
        resp
    }

    async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
        let hash = Self::request_hash(&req);
        self.streams.lock().expect("log lock").insert(
            hash.clone(),
            StreamAccum {
                model: req.model.clone(),
                message_count: req.messages.len(),
                ..Default::default()
            },
        );
        *self.current.lock().expect("log lock") = Some(hash);
        req
    }

    async fn after_stream(&self, chunk: ResponseEvent) -> ResponseEvent {
        let key = self.current.lock().expect("log lock").clone();
        let Some(key) = key else { return chunk };

        let mut streams = self.streams.lock().expect("log lock");
        let Some(accum) = streams.get_mut(&key) else { return chunk };
        match &chunk {
            ResponseEvent::TextDelta(t) => accum.content.push_str(t),
            ResponseEvent::ToolCallDelta { name, .. } if !name.is_empty() => {
                accum.tool_call_names.push(name.clone());
            }
            ResponseEvent::Finish(reason) => {
                accum.finish_reason = Some(*reason);
                let accum = streams.remove(&key).expect("accum present");
                drop(streams);
                self.current.lock().expect("log lock").take();
                self.append_record(json!({
                    "at": Utc::now().to_rfc3339(),
                    "kind": "stream",
                    "request": key,
                    "model": accum.model,
                    "message_count": accum.message_count,
                    "content": accum.content,
                    "tool_calls": accum.tool_call_names,
                    "finish_reason": accum.finish_reason,
                }));
            }
            _ => {}
        }
        chunk
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
