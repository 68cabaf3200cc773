// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{Tool, ToolCall, ToolDescriptor, ToolOutput};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

/// Central registry holding all available tools.
///
/// Registration is one-shot at startup; the only post-startup mutation is
/// MCP group replacement, which happens under the same lock that guards
/// descriptor listing so the model never sees a half-replaced group.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.descriptor().name;
        let mut tools = self.tools.write().expect("registry lock");
        if tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().expect("registry lock").get(name).cloned()
    }

    /// Descriptors surfaced to the LLM in each request, sorted by name for
    /// a stable prompt prefix.
    pub fn list_descriptors(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().expect("registry lock");
        let mut descriptors: Vec<ToolDescriptor> =
            tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Atomically replace every tool whose name starts with `<prefix>_`
    /// with `tools`.  Used when an MCP server finishes (re)discovery.
    pub fn replace_group(&self, prefix: &str, tools: Vec<Arc<dyn Tool>>) {
        let group_prefix = format!("{prefix}_");
        let mut map = self.tools.write().expect("registry lock");
        map.retain(|name, _| !name.starts_with(&group_prefix));
        for tool in tools {
            map.insert(tool.descriptor().name, tool);
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tool = self.get(&call.name);
        match tool {
            Some(tool) => tool.invoke(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.tools.read().expect("registry lock").keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{Permission, Tool, ToolDescriptor};

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name.clone(),
                description: "echoes its input".into(),
                permission: Permission::Read,
                parameters: json!({ "type": "object" }),
                approval_required: false,
            }
        }

        async fn invoke(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool { name: name.into() })
    }

    #[test]
    fn register_and_get() {
        let reg = ToolRegistry::new();
        reg.register(echo("echo")).unwrap();
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let reg = ToolRegistry::new();
        reg.register(echo("t")).unwrap();
        let err = reg.register(echo("t")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(n) if n == "t"));
    }

    #[test]
    fn descriptors_are_sorted_by_name() {
        let reg = ToolRegistry::new();
        reg.register(echo("zeta")).unwrap();
        reg.register(echo("alpha")).unwrap();
        let names: Vec<String> =
            reg.list_descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let reg = ToolRegistry::new();
        reg.register(echo("echo")).unwrap();
        let call = ToolCall { id: "1".into(), name: "echo".into(), args: json!({"x": 1}) };
        let out = reg.execute(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn replace_group_swaps_only_prefixed_tools() {
        let reg = ToolRegistry::new();
        reg.register(echo("local")).unwrap();
        reg.register(echo("srv_old_a")).unwrap();
        reg.register(echo("srv_old_b")).unwrap();
        reg.replace_group("srv", vec![echo("srv_new")]);
        let names = reg.names();
        assert_eq!(names, vec!["local", "srv_new"]);
    }

    #[test]
    fn replace_group_does_not_touch_similar_prefixes() {
        let reg = ToolRegistry::new();
        reg.register(echo("srv2_tool")).unwrap();
        reg.replace_group("srv", vec![]);
        assert_eq!(reg.names(), vec!["srv2_tool"]);
    }
}
