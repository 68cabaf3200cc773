// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One MCP client per configured server.
//!
//! The client owns its transport and a request/response correlation layer:
//! every outbound call is tagged with a monotonically increasing id and
//! parked in a pending map; the dispatch worker routes replies by id.
//! Entries leave the map on reply, on per-call timeout, and when the
//! transport dies — a wedged call can never leak a waiting task.
//!
//! State machine: `Unconnected → Connecting → Connected → Disconnected`.
//! A failed connect is terminal `Disconnected` until the process restarts;
//! the pool never auto-retries, so a misconfigured server fails loudly
//! instead of flapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use quill_config::McpServerConfig;

use crate::{
    error::McpError,
    protocol::{self, Inbound},
    transport::TransportHandle,
    CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Connected,
    Disconnected,
}

/// A tool as reported by the server's `tools/list`.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

pub struct McpClient {
    name: String,
    config: Option<McpServerConfig>,
    state_tx: watch::Sender<ClientState>,
    pending: PendingMap,
    outbound: Mutex<Option<mpsc::Sender<Value>>>,
    transport: tokio::sync::Mutex<Option<TransportHandle>>,
    tools_cache: Mutex<Option<Vec<McpToolInfo>>>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ClientState::Unconnected);
        Arc::new(Self {
            name: config.name.clone(),
            config: Some(config),
            state_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound: Mutex::new(None),
            transport: tokio::sync::Mutex::new(None),
            tools_cache: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Build a client over an already-established transport and run the
    /// initialize handshake.  Tests wire a loopback transport through here.
    pub async fn connect_with_transport(
        name: &str,
        handle: TransportHandle,
    ) -> Result<Arc<Self>, McpError> {
        let (state_tx, _) = watch::channel(ClientState::Connecting);
        let client = Arc::new(Self {
            name: name.to_string(),
            config: None,
            state_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound: Mutex::new(None),
            transport: tokio::sync::Mutex::new(None),
            tools_cache: Mutex::new(None),
            next_id: AtomicU64::new(1),
        });
        Self::attach_and_handshake(&client, handle).await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    /// Non-blocking connect kickoff.  Progress is observable through
    /// [`wait_until_ready`](Self::wait_until_ready).
    pub fn start_connect(this: &Arc<Self>) {
        {
            let current = this.state();
            if current != ClientState::Unconnected {
                return;
            }
            let _ = this.state_tx.send(ClientState::Connecting);
        }
        let client = Arc::clone(this);
        tokio::spawn(async move {
            let Some(config) = client.config.clone() else {
                let _ = client.state_tx.send(ClientState::Disconnected);
                return;
            };
            match TransportHandle::connect(&config).await {
                Ok(handle) => {
                    if let Err(e) = Self::attach_and_handshake(&client, handle).await {
                        warn!(server = %client.name, "mcp connect failed: {e}");
                        client.teardown().await;
                    }
                }
                Err(e) => {
                    warn!(server = %client.name, "mcp transport connect failed: {e}");
                    let _ = client.state_tx.send(ClientState::Disconnected);
                }
            }
        });
    }

    /// Block until the client reaches `Connected` (true) or becomes
    /// `Disconnected` / the timeout elapses (false).
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match *rx.borrow() {
                ClientState::Connected => return true,
                ClientState::Disconnected => return false,
                _ => {}
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
                return false;
            }
        }
    }

    async fn attach_and_handshake(
        this: &Arc<Self>,
        mut handle: TransportHandle,
    ) -> Result<(), McpError> {
        let inbound = std::mem::replace(
            &mut handle.inbound,
            mpsc::channel(1).1, // placeholder; the real receiver moves to the dispatch task
        );
        let outbound = handle.outbound.clone();
        *this.outbound.lock().expect("outbound lock") = Some(outbound.clone());
        *this.transport.lock().await = Some(handle);

        Self::spawn_dispatch(this, inbound, outbound);

        // initialize → wait → notifications/initialized
        let params = protocol::initialize_params();
        this.request("initialize", params, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .await
            .map_err(|e| McpError::Connection {
                server: this.name.clone(),
                reason: format!("initialize: {e}"),
            })?;
        this.send_frame(protocol::notification("notifications/initialized", json!({})))?;

        let _ = this.state_tx.send(ClientState::Connected);
        info!(server = %this.name, "mcp server connected");
        Ok(())
    }

    /// Serialized inbound frame dispatch.  Runs until the transport closes,
    /// then fails every waiting caller and marks the client disconnected.
    fn spawn_dispatch(
        this: &Arc<Self>,
        mut inbound: mpsc::Receiver<Value>,
        outbound: mpsc::Sender<Value>,
    ) {
        let pending = Arc::clone(&this.pending);
        let state_tx = this.state_tx.clone();
        let client = Arc::clone(this);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match protocol::classify(&frame) {
                    Some(Inbound::Response { id, result }) => {
                        let waiter = pending.lock().expect("pending lock").remove(&id);
                        if let Some(tx) = waiter {
                            let _ = tx.send(result);
                        } else {
                            debug!(server = %client.name, id, "reply for unknown or timed-out request");
                        }
                    }
                    Some(Inbound::Request { id, method }) => {
                        // The only server→client requests we service; both
                        // get benign answers so the server does not stall.
                        let result = match method.as_str() {
                            "roots/list" => json!({ "roots": [] }),
                            _ => json!({}),
                        };
                        let _ = outbound.send(protocol::response(id, result)).await;
                    }
                    Some(Inbound::Notification { method }) => {
                        debug!(server = %client.name, method, "mcp notification");
                    }
                    None => {
                        warn!(server = %client.name, "unclassifiable mcp frame");
                    }
                }
            }
            // Transport closed underneath us: the server crashed or was
            // shut down.  Fail fast from now on.
            warn!(server = %client.name, "mcp transport closed");
            let _ = state_tx.send(ClientState::Disconnected);
            client.fail_pending("transport closed");
            client.tools_cache.lock().expect("cache lock").take();
        });
    }

    fn fail_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().expect("pending lock");
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    fn send_frame(&self, frame: Value) -> Result<(), McpError> {
        let outbound = self.outbound.lock().expect("outbound lock").clone();
        let Some(tx) = outbound else {
            return Err(McpError::Connection {
                server: self.name.clone(),
                reason: "not connected".into(),
            });
        };
        tx.try_send(frame).map_err(|_| McpError::Connection {
            server: self.name.clone(),
            reason: "transport closed".into(),
        })
    }

    /// Send a request and await its correlated reply.
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(id, tx);

        if let Err(e) = self.send_frame(protocol::request(id, method, params)) {
            self.pending.lock().expect("pending lock").remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(McpError::Protocol {
                server: self.name.clone(),
                reason: format!("{method}: {message}"),
            }),
            // The dispatch worker dropped the sender without replying —
            // the transport died mid-call.
            Ok(Err(_)) => Err(McpError::Connection {
                server: self.name.clone(),
                reason: format!("{method}: transport closed mid-call"),
            }),
            Err(_) => {
                // Timed out: remove the dead entry so it cannot accumulate.
                self.pending.lock().expect("pending lock").remove(&id);
                Err(McpError::Protocol {
                    server: self.name.clone(),
                    reason: format!("{method}: timed out after {}s", timeout.as_secs()),
                })
            }
        }
    }

    /// List the server's tools.  Results are cached until disconnect.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        if let Some(cached) = self.tools_cache.lock().expect("cache lock").clone() {
            return Ok(cached);
        }
        if self.state() != ClientState::Connected {
            return Err(McpError::Connection {
                server: self.name.clone(),
                reason: "not connected".into(),
            });
        }

        let result = self
            .request("tools/list", json!({}), Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .await?;
        let tools = result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| {
                        let name = t.get("name")?.as_str()?.to_string();
                        Some(McpToolInfo {
                            name,
                            description: t
                                .get("description")
                                .and_then(|d| d.as_str())
                                .unwrap_or("")
                                .to_string(),
                            input_schema: t
                                .get("inputSchema")
                                .cloned()
                                .unwrap_or_else(|| json!({ "type": "object" })),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        *self.tools_cache.lock().expect("cache lock") = Some(tools.clone());
        debug!(server = %self.name, count = tools.len(), "mcp tools discovered");
        Ok(tools)
    }

    /// Call a tool by its *original* (un-prefixed) name.
    ///
    /// Applies the 120-second per-call budget; a disconnected client fails
    /// fast without touching the wire.
    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<String, McpError> {
        if self.state() != ClientState::Connected {
            return Err(McpError::Tool {
                tool_name: tool_name.to_string(),
                cause: format!("server {} is disconnected", self.name),
            });
        }

        let params = json!({ "name": tool_name, "arguments": args });
        let result = self
            .request("tools/call", params, Duration::from_secs(CALL_TIMEOUT_SECS))
            .await
            .map_err(|e| match e {
                // Every failure of a tools/call surfaces as a tool error so
                // the orchestrator can write it into the tool result.
                McpError::Protocol { reason, .. } if reason.contains("timed out") => {
                    McpError::ToolTimeout {
                        tool_name: tool_name.to_string(),
                        secs: CALL_TIMEOUT_SECS,
                    }
                }
                McpError::Protocol { reason, .. } | McpError::Connection { reason, .. } => {
                    McpError::Tool { tool_name: tool_name.to_string(), cause: reason }
                }
                other => other,
            })?;

        let mut text = String::new();
        if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
            for item in content {
                if let Some(t) = item.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
        }
        if let Some(structured) = result.get("structuredContent").filter(|s| !s.is_null()) {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&serde_json::to_string_pretty(structured).unwrap_or_default());
        }
        if result.get("isError").and_then(|e| e.as_bool()).unwrap_or(false) {
            return Err(McpError::Tool {
                tool_name: tool_name.to_string(),
                cause: if text.is_empty() { "tool reported an error".into() } else { text },
            });
        }
        if text.is_empty() {
            text = "tool returned no content".into();
        }
        Ok(text)
    }

    /// Idempotent teardown: close the transport, kill the subprocess within
    /// the 5-second budget, fail pending calls, drop the tool cache.
    pub async fn disconnect(&self) {
        if self.state() == ClientState::Disconnected {
            return;
        }
        self.teardown().await;
        info!(server = %self.name, "mcp server disconnected");
    }

    async fn teardown(&self) {
        let _ = self.state_tx.send(ClientState::Disconnected);
        // Dropping the outbound sender ends the writer task, closing the
        // child's stdin as the graceful half of shutdown.
        self.outbound.lock().expect("outbound lock").take();
        self.fail_pending("disconnected");
        self.tools_cache.lock().expect("cache lock").take();
        if let Some(mut handle) = self.transport.lock().await.take() {
            handle.shutdown().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Spawn an in-memory MCP server speaking JSON-RPC over channels.
    /// Returns the transport handle for the client side.
    ///
    /// `crash_on_call` makes the server drop its end mid-`tools/call`,
    /// emulating a child process dying during a request.
    fn loopback_server(crash_on_call: bool) -> TransportHandle {
        let (out_tx, mut out_rx) = mpsc::channel::<Value>(16);
        let (in_tx, in_rx) = mpsc::channel::<Value>(16);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let method = frame.get("method").and_then(|m| m.as_str()).unwrap_or("");
                let id = frame.get("id").cloned();
                match (method, id) {
                    ("initialize", Some(id)) => {
                        let _ = in_tx
                            .send(json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": {
                                    "protocolVersion": "2024-11-05",
                                    "capabilities": { "tools": {} },
                                    "serverInfo": { "name": "loopback", "version": "0.0.0" }
                                }
                            }))
                            .await;
                    }
                    ("tools/list", Some(id)) => {
                        let _ = in_tx
                            .send(json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": { "tools": [
                                    {
                                        "name": "bar",
                                        "description": "does bar things",
                                        "inputSchema": { "type": "object", "properties": {} }
                                    }
                                ]}
                            }))
                            .await;
                    }
                    ("tools/call", Some(id)) => {
                        if crash_on_call {
                            // Child dies: both channel halves drop.
                            return;
                        }
                        let name = frame["params"]["name"].as_str().unwrap_or("").to_string();
                        let _ = in_tx
                            .send(json!({
                                "jsonrpc": "2.0",
                                "id": id,
                                "result": { "content": [
                                    { "type": "text", "text": format!("ran {name}") }
                                ]}
                            }))
                            .await;
                    }
                    _ => {}
                }
            }
        });

        TransportHandle::loopback(out_tx, in_rx)
    }

    #[tokio::test]
    async fn handshake_reaches_connected() {
        let handle = loopback_server(false);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn list_tools_returns_and_caches() {
        let handle = loopback_server(false);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "bar");
        // Second call is served from cache (the loopback server would
        // answer again, but identity of content is enough here).
        let again = client.list_tools().await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn call_tool_returns_text_content() {
        let handle = loopback_server(false);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();
        let out = client.call_tool("bar", json!({})).await.unwrap();
        assert_eq!(out, "ran bar");
    }

    #[tokio::test]
    async fn server_crash_mid_call_fails_the_call_and_disconnects() {
        let handle = loopback_server(true);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();

        let err = client.call_tool("bar", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Tool { .. }), "got {err:?}");

        // The dispatch loop observed the closed transport.
        assert!(
            client.wait_until_ready(Duration::from_millis(200)).await == false
                && client.state() == ClientState::Disconnected
        );

        // Subsequent calls fail fast without reconnecting.
        let err = client.call_tool("bar", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Tool { cause, .. } if cause.contains("disconnected")));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let handle = loopback_server(false);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_invalidates_tool_cache() {
        let handle = loopback_server(false);
        let client = McpClient::connect_with_transport("foo", handle).await.unwrap();
        client.list_tools().await.unwrap();
        client.disconnect().await;
        assert!(client.tools_cache.lock().unwrap().is_none());
        // And listing now fails because the client is disconnected.
        assert!(client.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn wait_until_ready_times_out_for_unconnected_client() {
        let config = McpServerConfig {
            name: "never".into(),
            transport: quill_config::McpTransport::Stdio,
            command: Some("/nonexistent/server".into()),
            args: vec![],
            env: Default::default(),
            url: None,
            headers: Default::default(),
        };
        let client = McpClient::new(config);
        McpClient::start_connect(&client);
        let ready = client.wait_until_ready(Duration::from_secs(2)).await;
        assert!(!ready);
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
