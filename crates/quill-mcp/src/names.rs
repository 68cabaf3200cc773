// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-name sanitization.
//!
//! MCP tools enter the shared registry as `<server>_<tool>`; both halves
//! are squeezed into `[A-Za-z0-9_]` so the combined name is valid for
//! every provider's function-name grammar and unique per server.

/// Replace every non-`[A-Za-z0-9_]` run with a single `_`, trim leading and
/// trailing underscores, and fall back to `"unnamed"` for inputs with no
/// usable characters.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Namespaced registry name for a server's tool.
pub fn prefixed_tool_name(server: &str, tool: &str) -> String {
    format!("{}_{}", sanitize_name(server), sanitize_name(tool))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
