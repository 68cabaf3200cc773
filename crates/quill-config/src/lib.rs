// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod env;
mod loader;
mod mcp;
mod schema;

pub use env::expand_env_vars;
pub use loader::{find_config_file, load, ConfigError};
pub use mcp::{load_mcp_config, write_mcp_config, McpServerConfig, McpTransport};
pub use schema::*;

/// Name of the per-project / per-user state directory.
pub const STATE_DIR: &str = ".quill";
