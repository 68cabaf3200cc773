// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::json;

use crate::{builtin::require_str, Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

/// Run a shell command and capture stdout + stderr.
pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "run_command".into(),
            description: "Run a shell command in the workspace and return its output.".into(),
            permission: Permission::Execute,
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" }
                },
                "required": ["command"]
            }),
            approval_required: true,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let command = match require_str(&call.args, "command") {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await;
        match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("stderr: ");
                    text.push_str(&stderr);
                }
                if out.status.success() {
                    ToolOutput::ok(&call.id, text)
                } else {
                    let code = out.status.code().unwrap_or(-1);
                    ToolOutput::err(&call.id, format!("exit {code}: {text}"))
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("cannot spawn shell: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let call = ToolCall {
            id: "1".into(),
            name: "run_command".into(),
            args: json!({ "command": "echo hi" }),
        };
        let out = RunCommandTool.invoke(&call).await;
        assert!(!out.is_error);
        assert_eq!(out.content.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_result() {
        let call = ToolCall {
            id: "1".into(),
            name: "run_command".into(),
            args: json!({ "command": "exit 3" }),
        };
        let out = RunCommandTool.invoke(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("exit 3"));
    }
}
