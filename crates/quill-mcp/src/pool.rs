// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The pool owns every MCP client and feeds their discovered tools into the
//! shared [`ToolRegistry`] as a namespaced group.  Tools receive a handle
//! that forwards calls but cannot destroy the connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use quill_config::McpServerConfig;
use quill_tools::{Permission, Tool, ToolCall, ToolDescriptor, ToolOutput, ToolRegistry};

use crate::{
    client::{McpClient, McpToolInfo},
    names::{prefixed_tool_name, sanitize_name},
    CONNECT_TIMEOUT_SECS,
};

pub struct McpPool {
    clients: Vec<Arc<McpClient>>,
}

impl McpPool {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        Self { clients: configs.into_iter().map(McpClient::new).collect() }
    }

    pub fn clients(&self) -> &[Arc<McpClient>] {
        &self.clients
    }

    /// Kick off every connection, wait for each to become ready (or fail),
    /// and register the tools of the ready ones.  Failed servers stay
    /// disabled for the rest of the session.
    pub async fn connect_and_register(&self, registry: &ToolRegistry) {
        for client in &self.clients {
            McpClient::start_connect(client);
        }
        for client in &self.clients {
            let ready = client
                .wait_until_ready(Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .await;
            if !ready {
                warn!(server = %client.name(), "mcp server failed to connect; disabled for this session");
                continue;
            }
            match client.list_tools().await {
                Ok(tools) => {
                    Self::register_group(registry, client, &tools);
                    info!(server = %client.name(), count = tools.len(), "mcp tools registered");
                }
                Err(e) => {
                    warn!(server = %client.name(), "mcp tool discovery failed: {e}");
                }
            }
        }
    }

    /// Atomically (re)place one server's tool group in the registry.
    pub fn register_group(registry: &ToolRegistry, client: &Arc<McpClient>, tools: &[McpToolInfo]) {
        let prefix = sanitize_name(client.name());
        let adapters: Vec<Arc<dyn Tool>> = tools
            .iter()
            .map(|info| {
                Arc::new(McpToolAdapter {
                    client: Arc::clone(client),
                    original_name: info.name.clone(),
                    registry_name: prefixed_tool_name(client.name(), &info.name),
                    description: info.description.clone(),
                    input_schema: info.input_schema.clone(),
                }) as Arc<dyn Tool>
            })
            .collect();
        registry.replace_group(&prefix, adapters);
    }

    /// Tear down every client within its disconnect budget.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            client.disconnect().await;
        }
    }
}

/// Bridges one discovered MCP tool into the local tool contract.  Errors
/// are stringified into the tool output so the model sees the failure.
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    original_name: String,
    registry_name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.registry_name.clone(),
            description: self.description.clone(),
            // The server decides what its tools really do; read is the
            // conservative default for permission gating.
            permission: Permission::Read,
            parameters: if self.input_schema.is_object() {
                self.input_schema.clone()
            } else {
                json!({ "type": "object" })
            },
            approval_required: false,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        match self.client.call_tool(&self.original_name, call.args.clone()).await {
            Ok(text) => ToolOutput::ok(&call.id, text),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::transport::TransportHandle;

    fn loopback_server() -> TransportHandle {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(16);
        let (in_tx, in_rx) = mpsc::channel::<Value>(16);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let method = frame.get("method").and_then(|m| m.as_str()).unwrap_or("");
                let Some(id) = frame.get("id").cloned() else { continue };
                let result = match method {
                    "initialize" => json!({ "protocolVersion": "2024-11-05" }),
                    "tools/list" => json!({ "tools": [
                        { "name": "fetch-page", "description": "fetch", "inputSchema": { "type": "object" } }
                    ]}),
                    "tools/call" => json!({ "content": [{ "type": "text", "text": "ok" }] }),
                    _ => continue,
                };
                let _ = in_tx
                    .send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
                    .await;
            }
        });
        TransportHandle::loopback(out_tx, in_rx)
    }

    #[tokio::test]
    async fn adapter_names_are_prefixed_and_sanitized() {
        let client = McpClient::connect_with_transport("web.search", loopback_server())
            .await
            .unwrap();
        let registry = ToolRegistry::new();
        let tools = client.list_tools().await.unwrap();
        McpPool::register_group(&registry, &client, &tools);
        assert_eq!(registry.names(), vec!["web_search_fetch_page"]);
    }

    #[tokio::test]
    async fn adapter_invokes_through_the_client() {
        let client = McpClient::connect_with_transport("srv", loopback_server()).await.unwrap();
        let registry = ToolRegistry::new();
        let tools = client.list_tools().await.unwrap();
        McpPool::register_group(&registry, &client, &tools);

        let call = ToolCall {
            id: "c1".into(),
            name: "srv_fetch_page".into(),
            args: json!({ "url": "http://example.com" }),
        };
        let out = registry.execute(&call).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "ok");
    }

    #[tokio::test]
    async fn re_registration_replaces_the_group() {
        let client = McpClient::connect_with_transport("srv", loopback_server()).await.unwrap();
        let registry = ToolRegistry::new();
        let tools = client.list_tools().await.unwrap();
        McpPool::register_group(&registry, &client, &tools);
        // Re-register with a renamed tool: the old entry must vanish.
        let renamed = vec![McpToolInfo {
            name: "other".into(),
            description: String::new(),
            input_schema: json!({ "type": "object" }),
        }];
        McpPool::register_group(&registry, &client, &renamed);
        assert_eq!(registry.names(), vec!["srv_other"]);
    }
}
