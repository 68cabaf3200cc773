// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;

use quill_core::Advisor;
use quill_model::{CompletionRequest, Message, MessageContent, Role};

use crate::skills::SkillsManager;

const BLOCK_OPEN: &str = "<available_skills>";

/// Appends an `<available_skills>` block to the system message so the
/// model knows which skills exist and to call `activate_skill` on a match.
/// Idempotent: a request whose system message already carries the block is
/// left untouched.
pub struct SkillsAdvisor {
    manager: Arc<SkillsManager>,
}

impl SkillsAdvisor {
    pub fn new(manager: Arc<SkillsManager>) -> Self {
        Self { manager }
    }

    fn build_block(&self) -> Option<String> {
        let skills = self.manager.enabled_skills();
        if skills.is_empty() {
            return None;
        }
        let mut block = String::from(BLOCK_OPEN);
        block.push('\n');
        for skill in skills {
            block.push_str(&format!(
                "  <skill name=\"{}\">{}</skill>\n",
                skill.name, skill.description
            ));
        }
        block.push_str("</available_skills>\n");
        block.push_str(
            "When the user's request matches one of these skills, call the \
             activate_skill tool with its name before doing anything else.",
        );
        Some(block)
    }

    fn inject(&self, mut req: CompletionRequest) -> CompletionRequest {
        let Some(block) = self.build_block() else { return req };
        match req.messages.first_mut() {
            Some(m) if m.role == Role::System => {
                if let MessageContent::Text(text) = &mut m.content {
                    if !text.contains(BLOCK_OPEN) {
                        text.push_str("\n\n");
                        text.push_str(&block);
                    }
                }
            }
            _ => req.messages.insert(0, Message::system(block)),
        }
        req
    }
}

#[async_trait]
impl Advisor for SkillsAdvisor {
    fn name(&self) -> &str {
        "skills"
    }

    async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
        self.inject(req)
    }

    async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
        self.inject(req)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_skills(tmp: &std::path::Path) -> Arc<SkillsManager> {
        let dir = tmp.join("user");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("review.md"),
            "---\ndescription: review code for bugs\n---\nReview body",
        )
        .unwrap();
        let mgr = Arc::new(SkillsManager::new(Some(dir), None, tmp.join("skills.json")));
        mgr.scan();
        mgr
    }

    #[tokio::test]
    async fn block_appended_to_system_message() {
        let tmp = tempfile::tempdir().unwrap();
        let advisor = SkillsAdvisor::new(manager_with_skills(tmp.path()));
        let req = CompletionRequest {
            messages: vec![Message::system("base prompt"), Message::user("hi")],
            ..Default::default()
        };
        let out = advisor.before_stream(req).await;
        let sys = out.messages[0].as_text().unwrap();
        assert!(sys.starts_with("base prompt"));
        assert!(sys.contains("<available_skills>"));
        assert!(sys.contains("<skill name=\"review\">review code for bugs</skill>"));
    }

    #[tokio::test]
    async fn injection_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let advisor = SkillsAdvisor::new(manager_with_skills(tmp.path()));
        let req = CompletionRequest {
            messages: vec![Message::system("base"), Message::user("hi")],
            ..Default::default()
        };
        let once = advisor.before_stream(req).await;
        let twice = advisor.before_stream(once.clone()).await;
        assert_eq!(
            once.messages[0].as_text().unwrap(),
            twice.messages[0].as_text().unwrap(),
            "running the advisor twice must not duplicate the block"
        );
    }

    #[tokio::test]
    async fn no_skills_no_injection() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = Arc::new(SkillsManager::new(None, None, tmp.path().join("m.json")));
        mgr.scan();
        let advisor = SkillsAdvisor::new(mgr);
        let req = CompletionRequest {
            messages: vec![Message::system("base")],
            ..Default::default()
        };
        let out = advisor.before_call(req).await;
        assert_eq!(out.messages[0].as_text(), Some("base"));
    }
}
