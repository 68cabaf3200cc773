// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! MCP transports.
//!
//! Every transport reduces to the same shape: an outbound channel of
//! JSON-RPC frames, an inbound channel of JSON-RPC frames, and an optional
//! child-process handle for teardown.  The client's dispatch loop never
//! knows which wire the frames crossed.
//!
//! - **stdio**: spawn `command args` with the configured env; frames are
//!   newline-delimited JSON over the child's stdin/stdout.
//! - **http**: every outbound frame is an HTTP POST; the response body is
//!   the reply frame (streamable HTTP).
//! - **sse**: a long-lived `text/event-stream` carries server→client
//!   frames; client→server frames are POSTed to the same endpoint.

use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use quill_config::{McpServerConfig, McpTransport};

use crate::{error::McpError, DISCONNECT_TIMEOUT_SECS};

/// A live transport: paired frame channels plus whatever must be torn down
/// on disconnect.
#[derive(Debug)]
pub struct TransportHandle {
    pub outbound: mpsc::Sender<Value>,
    pub inbound: mpsc::Receiver<Value>,
    child: Option<Child>,
}

impl TransportHandle {
    /// Build an in-memory handle from pre-wired channels.  Tests use this
    /// to emulate a server without spawning processes.
    pub fn loopback(
        outbound: mpsc::Sender<Value>,
        inbound: mpsc::Receiver<Value>,
    ) -> Self {
        Self { outbound, inbound, child: None }
    }

    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        match config.transport {
            McpTransport::Stdio => connect_stdio(config),
            McpTransport::Http => connect_http(config),
            McpTransport::Sse => connect_sse(config).await,
        }
    }

    /// Tear the transport down.  For stdio the child gets a 2-second grace
    /// (stdin closes when the writer task exits) before it is killed; the
    /// whole teardown stays within the 5-second disconnect budget.
    pub async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else { return };
        let grace = Duration::from_secs(2);
        let budget = Duration::from_secs(DISCONNECT_TIMEOUT_SECS);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        debug!("mcp child did not exit within grace period, killing");
        let _ = child.start_kill();
        let _ = tokio::time::timeout(budget - grace, child.wait()).await;
    }
}

fn connect_stdio(config: &McpServerConfig) -> Result<TransportHandle, McpError> {
    let command = config.command.as_deref().ok_or_else(|| McpError::Connection {
        server: config.name.clone(),
        reason: "stdio transport requires a command".into(),
    })?;

    let mut child = Command::new(command)
        .args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| McpError::Connection {
            server: config.name.clone(),
            reason: format!("spawning {command}: {e}"),
        })?;

    let stdin = child.stdin.take().expect("child stdin was piped");
    let stdout = child.stdout.take().expect("child stdout was piped");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);

    // Writer: one frame per line.  Exits (closing the child's stdin) when
    // the outbound sender is dropped on disconnect.
    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(frame) = outbound_rx.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });

    // Reader: parse newline-framed JSON.  Exits when the child closes its
    // stdout, which drops `inbound_tx` and lets the dispatch loop observe
    // the disconnect.
    let server = config.name.clone();
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stdout, LinesCodec::new());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(server = %server, "mcp stdio read error: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(frame) => {
                    if inbound_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(server = %server, "mcp stdio bad frame: {e}"),
            }
        }
    });

    Ok(TransportHandle { outbound: outbound_tx, inbound: inbound_rx, child: Some(child) })
}

fn connect_http(config: &McpServerConfig) -> Result<TransportHandle, McpError> {
    let url = require_url(config)?;
    let headers = config.headers.clone();
    let client = reqwest::Client::new();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);

    let server = config.name.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            // Notifications get posted too; servers reply with 202/empty,
            // which simply produces no inbound frame.
            let mut req = client.post(&url).json(&frame);
            for (k, v) in &headers {
                req = req.header(k.as_str(), v.as_str());
            }
            match req.send().await {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(reply) if !reply.is_null() => {
                        if inbound_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {}
                },
                Err(e) => {
                    warn!(server = %server, "mcp http post failed: {e}");
                    // Channel closure signals the dispatch loop that the
                    // transport is dead.
                    break;
                }
            }
        }
    });

    Ok(TransportHandle { outbound: outbound_tx, inbound: inbound_rx, child: None })
}

async fn connect_sse(config: &McpServerConfig) -> Result<TransportHandle, McpError> {
    let url = require_url(config)?;
    let headers = config.headers.clone();
    let client = reqwest::Client::new();

    // Establish the long-lived event stream first so no reply can be lost.
    let mut req = client.get(&url).header("Accept", "text/event-stream");
    for (k, v) in &headers {
        req = req.header(k.as_str(), v.as_str());
    }
    let resp = req.send().await.map_err(|e| McpError::Connection {
        server: config.name.clone(),
        reason: format!("sse connect: {e}"),
    })?;
    if !resp.status().is_success() {
        return Err(McpError::Connection {
            server: config.name.clone(),
            reason: format!("sse connect: HTTP {}", resp.status()),
        });
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(64);

    // SSE reader: `data:` lines carry JSON-RPC frames.
    let server = config.name.clone();
    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = bytes.next().await {
            let Ok(chunk) = chunk else { break };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(nl) = buf.find('\n') {
                let line = buf[..nl].trim_end_matches('\r').to_string();
                buf = buf[nl + 1..].to_string();
                let Some(data) = line.strip_prefix("data:") else { continue };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(data) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(server = %server, "mcp sse bad frame: {e}"),
                }
            }
        }
    });

    // Outbound frames are POSTed; replies arrive on the event stream.
    let server = config.name.clone();
    let post_url = url.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let mut req = client.post(&post_url).json(&frame);
            for (k, v) in &headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Err(e) = req.send().await {
                warn!(server = %server, "mcp sse post failed: {e}");
                break;
            }
        }
    });

    Ok(TransportHandle { outbound: outbound_tx, inbound: inbound_rx, child: None })
}

fn require_url(config: &McpServerConfig) -> Result<String, McpError> {
    let url = config.url.as_deref().ok_or_else(|| McpError::Connection {
        server: config.name.clone(),
        reason: format!("{} transport requires a url", config.transport),
    })?;
    url::Url::parse(url).map_err(|e| McpError::Connection {
        server: config.name.clone(),
        reason: format!("invalid url {url}: {e}"),
    })?;
    Ok(url.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stdio_config(command: &str, args: &[&str]) -> McpServerConfig {
        McpServerConfig {
            name: "test".into(),
            transport: McpTransport::Stdio,
            command: Some(command.into()),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Default::default(),
            url: None,
            headers: Default::default(),
        }
    }

    #[tokio::test]
    async fn stdio_round_trips_a_frame_through_cat() {
        // `cat` echoes our request line verbatim, which is a valid JSON
        // frame — enough to prove framing in both directions.
        let config = stdio_config("cat", &[]);
        let mut handle = TransportHandle::connect(&config).await.unwrap();
        let frame = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping", "params": {} });
        handle.outbound.send(frame.clone()).await.unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(5), handle.inbound.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(echoed, frame);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stdio_missing_command_is_a_connection_error() {
        let mut config = stdio_config("x", &[]);
        config.command = None;
        let err = TransportHandle::connect(&config).await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }));
    }

    #[tokio::test]
    async fn stdio_nonexistent_binary_is_a_connection_error() {
        let config = stdio_config("/nonexistent/quill-mcp-server", &[]);
        let err = TransportHandle::connect(&config).await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }));
    }

    #[tokio::test]
    async fn child_exit_closes_inbound_channel() {
        let config = stdio_config("sh", &["-c", "exit 0"]);
        let mut handle = TransportHandle::connect(&config).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), handle.inbound.recv()).await;
        assert_eq!(got.expect("timed out"), None, "inbound must close when the child dies");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn http_config_without_url_fails() {
        let config = McpServerConfig {
            name: "h".into(),
            transport: McpTransport::Http,
            command: None,
            args: vec![],
            env: Default::default(),
            url: None,
            headers: Default::default(),
        };
        assert!(TransportHandle::connect(&config).await.is_err());
    }
}
