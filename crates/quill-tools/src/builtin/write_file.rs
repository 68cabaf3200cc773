// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{builtin::require_str, Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "write_file".into(),
            description: "Write content to a file, creating parent directories as needed. \
                          Overwrites existing content."
                .into(),
            permission: Permission::Write,
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to write" },
                    "content": { "type": "string", "description": "Content to write" }
                },
                "required": ["path", "content"]
            }),
            approval_required: true,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let path = match require_str(&call.args, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let content = match require_str(&call.args, "content") {
            Ok(c) => c.to_string(),
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(&call.id, format!("cannot create {}: {e}", parent.display()));
                }
            }
        }
        match tokio::fs::write(&path, &content).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("cannot write {path}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_content_and_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("nested/dir/out.txt");
        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            args: json!({ "path": file, "content": "data" }),
        };
        let out = WriteFileTool.invoke(&call).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "data");
    }

    #[test]
    fn write_requires_approval_and_mutates() {
        let d = WriteFileTool.descriptor();
        assert!(d.approval_required);
        assert!(d.permission.mutates_workspace());
    }
}
