// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{builtin::require_str, Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

/// List directory entries, one per line, directories suffixed with `/`.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "list_files".into(),
            description: "List the files in a directory. Directories end with '/'.".into(),
            permission: Permission::Read,
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list" }
                },
                "required": ["path"]
            }),
            approval_required: false,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(&call.args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("cannot list {path}: {e}")),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        ToolOutput::ok(&call.id, names.join("\n"))
    }
}
