// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{builtin::require_str, Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Read a UTF-8 text file and return its contents.".into(),
            permission: Permission::Read,
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to read" }
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
        match tokio::fs::read_to_string(path).await {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("cannot read {path}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_file_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("hello.txt");
        std::fs::write(&file, "hi there").unwrap();
        let call = ToolCall {
            id: "1".into(),
            name: "read_file".into(),
            args: json!({ "path": file }),
        };
        let out = ReadFileTool.invoke(&call).await;
        assert_eq!(out.content, "hi there");
    }

    #[tokio::test]
    async fn nonexistent_file_is_an_error_result() {
        let call = ToolCall {
            id: "1".into(),
            name: "read_file".into(),
            args: json!({ "path": "/nonexistent/quill/file.txt" }),
        };
        let out = ReadFileTool.invoke(&call).await;
        assert!(out.is_error);
    }
}
