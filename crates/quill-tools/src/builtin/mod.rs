// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod list_files;
pub mod read_file;
pub mod run_command;
pub mod write_file;

use serde_json::Value;

/// Extract a required string argument, or produce the error text the model
/// will see.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required argument: {key}"))
}
