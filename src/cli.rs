// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};

/// quill — an AI coding agent in your terminal.
///
/// With no subcommand, opens the interactive composer in the current
/// directory.
#[derive(Parser, Debug)]
#[command(name = "quill", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Write tracing output to stderr (useful outside the composer).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold ./.quill/config.yaml with commented defaults.
    Init,

    /// Manage external MCP servers (./.quill/mcp.json).
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },

    /// Resume a previous session (most recent when no id is given).
    Resume {
        /// Session id as printed by the composer / session list.
        session_id: Option<String>,
    },

    /// Restore the workspace from a checkpoint (latest when none given).
    Restore {
        /// Checkpoint file name, or "list" to enumerate checkpoints.
        checkpoint: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// List configured servers and their transports.
    List,

    /// Add a server.
    ///
    /// stdio:  quill mcp add files --command mcp-files --args --root --args .
    /// http:   quill mcp add search --transport http --url http://localhost:9920/mcp
    Add {
        /// Server name; becomes the tool namespace prefix.
        name: String,
        /// Transport: stdio (default), http or sse.
        #[arg(long, default_value = "stdio")]
        transport: String,
        /// Executable for stdio servers.
        #[arg(long)]
        command: Option<String>,
        /// Arguments for stdio servers (repeatable).
        #[arg(long = "args")]
        args: Vec<String>,
        /// KEY=VALUE environment entries (repeatable, ${NAME} expanded at load).
        #[arg(long = "env")]
        env: Vec<String>,
        /// Endpoint URL for http/sse servers.
        #[arg(long)]
        url: Option<String>,
    },

    /// Remove a server by name.
    Remove { name: String },
}
