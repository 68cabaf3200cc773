// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! `mcp.json` — the on-disk registry of external MCP servers.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "files": { "transport": "stdio", "command": "mcp-files", "args": ["--root", "."] },
//!     "search": { "transport": "http", "url": "http://localhost:9920/mcp" }
//!   }
//! }
//! ```
//!
//! `env` values of the form `${NAME}` are expanded from the process
//! environment at load time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{env::expand_env_vars, loader::ConfigError, STATE_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpTransport::Stdio => write!(f, "stdio"),
            McpTransport::Http => write!(f, "http"),
            McpTransport::Sse => write!(f, "sse"),
        }
    }
}

/// One configured MCP server.  `name` is the key under `mcpServers` and
/// becomes the sanitized namespace prefix of the server's tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub transport: McpTransport,
    /// stdio: executable to spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// http / sse: endpoint URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct McpFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: std::collections::BTreeMap<String, McpServerConfig>,
}

fn mcp_config_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(STATE_DIR).join("mcp.json")
}

/// Load the MCP server list for `workspace_dir`.  A missing file yields an
/// empty list; servers with obviously unusable entries (stdio without a
/// command, http/sse without a url) are skipped with a warning rather than
/// failing the whole load.
pub fn load_mcp_config(workspace_dir: &Path) -> Result<Vec<McpServerConfig>, ConfigError> {
    let path = mcp_config_path(workspace_dir);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let file: McpFile = serde_json::from_str(&text).map_err(|source| ConfigError::ParseJson {
        path: path.clone(),
        source,
    })?;

    let mut servers = Vec::new();
    for (name, mut cfg) in file.mcp_servers {
        cfg.name = name.clone();
        match cfg.transport {
            McpTransport::Stdio if cfg.command.is_none() => {
                warn!(server = %name, "mcp server missing command, skipping");
                continue;
            }
            McpTransport::Http | McpTransport::Sse if cfg.url.is_none() => {
                warn!(server = %name, "mcp server missing url, skipping");
                continue;
            }
            _ => {}
        }
        for val in cfg.env.values_mut() {
            *val = expand_env_vars(val);
        }
        servers.push(cfg);
    }
    Ok(servers)
}

/// Write the full server set back to `mcp.json` (used by `quill mcp
/// add|remove`).  Writes to a temp file and renames for atomicity.
pub fn write_mcp_config(
    workspace_dir: &Path,
    servers: &[McpServerConfig],
) -> Result<(), ConfigError> {
    let path = mcp_config_path(workspace_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
    }
    let mut file = McpFile::default();
    for s in servers {
        file.mcp_servers.insert(s.name.clone(), s.clone());
    }
    let json = serde_json::to_string_pretty(&file).expect("mcp config serializes");
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|source| ConfigError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, &path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mcp_json(dir: &Path, json: &str) {
        let state = dir.join(STATE_DIR);
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join("mcp.json"), json).unwrap();
    }

    #[test]
    fn missing_file_yields_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_mcp_config(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn stdio_server_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        write_mcp_json(
            tmp.path(),
            r#"{"mcpServers":{"files":{"command":"mcp-files","args":["--root","."]}}}"#,
        );
        let servers = load_mcp_config(tmp.path()).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "files");
        assert_eq!(servers[0].transport, McpTransport::Stdio);
        assert_eq!(servers[0].command.as_deref(), Some("mcp-files"));
        assert_eq!(servers[0].args, vec!["--root", "."]);
    }

    #[test]
    fn http_server_without_url_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_mcp_json(tmp.path(), r#"{"mcpServers":{"bad":{"transport":"http"}}}"#);
        assert!(load_mcp_config(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn env_values_expanded_at_load() {
        std::env::set_var("QUILL_TEST_MCP_TOKEN", "sekrit");
        let tmp = tempfile::tempdir().unwrap();
        write_mcp_json(
            tmp.path(),
            r#"{"mcpServers":{"gh":{"command":"gh-mcp","env":{"TOKEN":"${QUILL_TEST_MCP_TOKEN}"}}}}"#,
        );
        let servers = load_mcp_config(tmp.path()).unwrap();
        assert_eq!(servers[0].env.get("TOKEN").unwrap(), "sekrit");
    }

    #[test]
    fn write_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let server = McpServerConfig {
            name: "search".into(),
            transport: McpTransport::Http,
            command: None,
            args: vec![],
            env: HashMap::new(),
            url: Some("http://localhost:9920/mcp".into()),
            headers: HashMap::new(),
        };
        write_mcp_config(tmp.path(), &[server]).unwrap();
        let servers = load_mcp_config(tmp.path()).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].url.as_deref(), Some("http://localhost:9920/mcp"));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_mcp_json(tmp.path(), "{not json");
        assert!(load_mcp_config(tmp.path()).is_err());
    }
}
