// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model, with arguments already
/// parsed from the raw JSON text.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// What a tool does to the workspace.  `Write` and `Execute` tools get a
/// checkpoint snapshot before they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
}

impl Permission {
    /// Whether a pre-run workspace snapshot is warranted.
    pub fn mutates_workspace(&self) -> bool {
        matches!(self, Permission::Write | Permission::Execute)
    }
}

/// Everything the rest of the system needs to know about a tool without
/// holding the implementation.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub permission: Permission,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Ask the user before each invocation (unless auto-approval is on).
    pub approval_required: bool,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (the content is an
    /// error message the model can read and react to).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Trait every built-in and MCP-backed tool implements.
///
/// Invocation is synchronous from the caller's viewpoint but may block on
/// I/O internally; callers wrap their own timeout when they need one.
/// Errors are wrapped in [`ToolOutput::err`] rather than raised, so a
/// failing tool never unwinds the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
