// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use quill_model::{ChatCompletion, ResponseEvent};
use quill_tools::{Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

pub const FINISH_TASK_TOOL: &str = "finish_task";

/// Watches the response for the `finish_task` sentinel call and raises a
/// flag the orchestrator checks after each round.  The flag is reset at
/// the start of every user turn.
#[derive(Default)]
pub struct FinishTaskAdvisor {
    requested: Arc<AtomicBool>,
}

impl FinishTaskAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl crate::advisor::Advisor for FinishTaskAdvisor {
    fn name(&self) -> &str {
        "finish-task"
    }

    async fn after_stream(&self, chunk: ResponseEvent) -> ResponseEvent {
        if let ResponseEvent::ToolCallDelta { name, .. } = &chunk {
            if name == FINISH_TASK_TOOL {
                self.requested.store(true, Ordering::SeqCst);
            }
        }
        chunk
    }

    async fn after_call(&self, resp: ChatCompletion) -> ChatCompletion {
        if resp.tool_calls.iter().any(|tc| tc.name == FINISH_TASK_TOOL) {
            self.requested.store(true, Ordering::SeqCst);
        }
        resp
    }
}

/// The sentinel tool itself.  Executing it only acknowledges completion so
/// the transcript keeps its call/result pairing; the advisor flag is what
/// actually terminates the loop.
pub struct FinishTaskTool;

#[async_trait]
impl Tool for FinishTaskTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: FINISH_TASK_TOOL.into(),
            description: "Signal that the requested task is complete. Call this instead of \
                          continuing to call tools once everything is done."
                .into(),
            permission: Permission::Read,
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "One-sentence summary of what was accomplished"
                    }
                }
            }),
            approval_required: false,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let summary = call
            .args
            .get("summary")
            .and_then(|s| s.as_str())
            .unwrap_or("Task complete.");
        ToolOutput::ok(&call.id, summary)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
