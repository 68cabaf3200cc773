// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// Per-server MCP failures.  Tool errors are captured into the tool-result
/// message so the LLM sees the failure and can react; connection errors
/// disable the server for the rest of the session.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("mcp server {server}: connection failed: {reason}")]
    Connection { server: String, reason: String },
    #[error("mcp server {server}: protocol error: {reason}")]
    Protocol { server: String, reason: String },
    #[error("mcp tool {tool_name} failed: {cause}")]
    Tool { tool_name: String, cause: String },
    #[error("mcp tool {tool_name} timed out after {secs}s")]
    ToolTimeout { tool_name: String, secs: u64 },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_names_the_tool() {
        let e = McpError::Tool { tool_name: "foo_bar".into(), cause: "child died".into() };
        assert!(e.to_string().contains("foo_bar"));
        assert!(e.to_string().contains("child died"));
    }

    #[test]
    fn timeout_error_reports_budget() {
        let e = McpError::ToolTimeout { tool_name: "slow".into(), secs: 120 };
        assert!(e.to_string().contains("120"));
    }
}
