// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal JSON-RPC 2.0 message layer for the MCP client side.

use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// An inbound frame, classified.
#[derive(Debug)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response { id: u64, result: Result<Value, String> },
    /// Server-initiated request we must answer (e.g. `roots/list`, `ping`).
    Request { id: Value, method: String },
    /// Fire-and-forget notification.
    Notification { method: String },
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params,
    })
}

pub fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": "quill",
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Classify an inbound JSON-RPC frame.  Returns `None` for frames that are
/// neither a response, a request, nor a notification.
pub fn classify(frame: &Value) -> Option<Inbound> {
    if let Some(method) = frame.get("method").and_then(|m| m.as_str()) {
        return match frame.get("id") {
            Some(id) if !id.is_null() => Some(Inbound::Request {
                id: id.clone(),
                method: method.to_string(),
            }),
            _ => Some(Inbound::Notification { method: method.to_string() }),
        };
    }

    let id = frame.get("id")?.as_u64()?;
    if let Some(err) = frame.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Some(Inbound::Response { id, result: Err(message) });
    }
    let result = frame.get("result").cloned().unwrap_or(Value::Null);
    Some(Inbound::Response { id, result: Ok(result) })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
