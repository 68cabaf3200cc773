// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use quill_model::{CompletionRequest, Message, Role};

use crate::{
    advisor::{Advisor, AgentView},
    prompts::{agent_role_prompt, PromptVars},
};

/// Ensures every request starts with a system message.  When the transcript
/// already carries one (e.g. a resumed session) the request is untouched.
pub struct SystemPromptAdvisor {
    view: Arc<dyn AgentView>,
    custom_template: Option<String>,
}

impl SystemPromptAdvisor {
    pub fn new(view: Arc<dyn AgentView>, custom_template: Option<String>) -> Self {
        Self { view, custom_template }
    }

    fn ensure_system(&self, mut req: CompletionRequest) -> CompletionRequest {
        if req.messages.first().map(|m| m.role == Role::System).unwrap_or(false) {
            return req;
        }
        let tool_list = self
            .view
            .tool_descriptors()
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n");
        let vars = PromptVars {
            timestamp: Utc::now().to_rfc3339(),
            workspace: self.view.workspace_dir().display().to_string(),
            os: std::env::consts::OS.to_string(),
            tool_list,
            model: self.view.model_name(),
        };
        let prompt = agent_role_prompt(self.custom_template.as_deref(), &vars);
        req.messages.insert(0, Message::system(prompt));
        req
    }
}

#[async_trait]
impl Advisor for SystemPromptAdvisor {
    fn name(&self) -> &str {
        "system-prompt"
    }

    async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
        self.ensure_system(req)
    }

    async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
        self.ensure_system(req)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use quill_tools::ToolDescriptor;
    use std::path::PathBuf;

    struct FakeView;

    impl AgentView for FakeView {
        fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "list_files".into(),
                description: "list".into(),
                permission: quill_tools::Permission::Read,
                parameters: serde_json::json!({ "type": "object" }),
                approval_required: false,
            }]
        }
        fn model_name(&self) -> String {
            "gpt-4o".into()
        }
        fn workspace_dir(&self) -> PathBuf {
            PathBuf::from("/tmp/ws")
        }
    }

    #[tokio::test]
    async fn inserts_system_message_when_absent() {
        let advisor = SystemPromptAdvisor::new(Arc::new(FakeView), None);
        let req = CompletionRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let out = advisor.before_stream(req).await;
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, Role::System);
        let sys = out.messages[0].as_text().unwrap();
        assert!(sys.contains("list_files"));
        assert!(sys.contains("/tmp/ws"));
    }

    #[tokio::test]
    async fn existing_system_message_is_preserved() {
        let advisor = SystemPromptAdvisor::new(Arc::new(FakeView), None);
        let req = CompletionRequest {
            messages: vec![Message::system("custom"), Message::user("hi")],
            ..Default::default()
        };
        let out = advisor.before_call(req).await;
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].as_text(), Some("custom"));
    }
}
