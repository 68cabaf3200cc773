// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt templates.
//!
//! Templates use `{variable}` placeholders; unknown placeholders are left
//! intact so template authors notice typos instead of getting silent empty
//! strings.

use std::collections::HashMap;

const AGENT_ROLE_TEMPLATE: &str = "\
You are quill, an AI coding assistant working in the user's terminal.

Current time: {timestamp}
Workspace: {workspace}
Operating system: {os}
Model: {model}

You can call the following tools to inspect and modify the workspace:
{tool_list}

Work in small, verifiable steps. Read before you write. When a task is
complete, call the finish_task tool instead of continuing to call tools.";

/// Variables available to the agent role template.
#[derive(Debug, Clone)]
pub struct PromptVars {
    pub timestamp: String,
    pub workspace: String,
    pub os: String,
    pub tool_list: String,
    pub model: String,
}

impl PromptVars {
    fn to_map(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("timestamp", self.timestamp.clone()),
            ("workspace", self.workspace.clone()),
            ("os", self.os.clone()),
            ("tool_list", self.tool_list.clone()),
            ("model", self.model.clone()),
        ])
    }
}

/// Substitute `{name}` placeholders from `vars`.  Unknown names stay put.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start + 1..].find('}') {
            Some(end) => {
                let name = &rest[start + 1..start + 1 + end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &rest[start + 1 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render the built-in agent role prompt, or a custom override template
/// with the same variable set.
pub fn agent_role_prompt(custom_template: Option<&str>, vars: &PromptVars) -> String {
    let template = custom_template.unwrap_or(AGENT_ROLE_TEMPLATE);
    render_template(template, &vars.to_map())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> PromptVars {
        PromptVars {
            timestamp: "2026-02-01T10:00:00Z".into(),
            workspace: "/home/user/project".into(),
            os: "linux".into(),
            tool_list: "- read_file\n- write_file".into(),
            model: "gpt-4o".into(),
        }
    }

    #[test]
    fn known_variables_substituted() {
        let out = render_template("at {timestamp} in {workspace}", &vars().to_map());
        assert_eq!(out, "at 2026-02-01T10:00:00Z in /home/user/project");
    }

    #[test]
    fn unknown_variables_left_intact() {
        let out = render_template("hello {nobody}", &vars().to_map());
        assert_eq!(out, "hello {nobody}");
    }

    #[test]
    fn unterminated_brace_kept_literal() {
        let out = render_template("broken {timestamp", &vars().to_map());
        assert_eq!(out, "broken {timestamp");
    }

    #[test]
    fn builtin_prompt_mentions_tools_and_model() {
        let out = agent_role_prompt(None, &vars());
        assert!(out.contains("read_file"));
        assert!(out.contains("gpt-4o"));
        assert!(out.contains("/home/user/project"));
        assert!(!out.contains('{'), "all placeholders must be resolved: {out}");
    }

    #[test]
    fn custom_template_overrides_builtin() {
        let out = agent_role_prompt(Some("model={model}"), &vars());
        assert_eq!(out, "model=gpt-4o");
    }
}
