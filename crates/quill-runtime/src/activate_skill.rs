// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use quill_tools::{Permission, Tool, ToolCall, ToolDescriptor, ToolOutput};

use crate::skills::SkillsManager;

pub const ACTIVATE_SKILL_TOOL: &str = "activate_skill";

/// The `activate_skill` tool.  Always registered; its `skill_name` enum is
/// rebuilt from the enabled skills on every descriptor listing, so the
/// model can only name skills that actually exist.
pub struct ActivateSkillTool {
    manager: Arc<SkillsManager>,
}

impl ActivateSkillTool {
    pub fn new(manager: Arc<SkillsManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ActivateSkillTool {
    fn descriptor(&self) -> ToolDescriptor {
        let enabled = self.manager.enabled_skills();
        let names: Vec<String> = enabled.iter().map(|s| s.name.clone()).collect();
        let description = if names.is_empty() {
            "Activate a skill to get its full instructions. No skills are currently available."
                .to_string()
        } else {
            format!(
                "Activate a skill to get its full instructions. Available skills: {}. \
                 Follow the returned <activated_skill> instructions with priority.",
                names.join(", ")
            )
        };
        let skill_name_schema = if names.is_empty() {
            json!({ "type": "string", "description": "Name of the skill to activate" })
        } else {
            json!({
                "type": "string",
                "enum": names,
                "description": "Name of the skill to activate"
            })
        };
        ToolDescriptor {
            name: ACTIVATE_SKILL_TOOL.into(),
            description,
            permission: Permission::Read,
            parameters: json!({
                "type": "object",
                "properties": { "skill_name": skill_name_schema },
                "required": ["skill_name"]
            }),
            approval_required: false,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        let Some(name) = call.args.get("skill_name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing required argument: skill_name");
        };
        let Some(skill) = self.manager.get(name) else {
            return ToolOutput::err(&call.id, format!("skill '{name}' does not exist"));
        };
        if skill.disabled {
            return ToolOutput::err(&call.id, format!("skill '{name}' is disabled"));
        }
        let body = xml_escape(&skill.content);
        ToolOutput::ok(
            &call.id,
            format!("<activated_skill name=\"{}\">\n{body}\n</activated_skill>", skill.name),
        )
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
