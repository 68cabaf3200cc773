// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Slash commands typed into the composer.
//!
//! Commands are intercepted before the input would become an LLM turn.
//! Dispatch is single-threaded within the composer: handlers are tried in
//! registration order until one reports the command as handled.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use quill_config::ModelConfig;
use quill_events::{AgentEvent, EventBus};

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The leading token this handler owns, e.g. `/model`.
    fn command(&self) -> &str;
    fn description(&self) -> &str;
    /// Handle the raw command line.  Return `false` to let dispatch keep
    /// looking (e.g. wrong subcommand shape).
    async fn handle(&self, raw: &str) -> bool;
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn is_command(input: &str) -> bool {
        input.trim_start().starts_with('/')
    }

    /// One-line-per-command help text (`/help` prints this).
    pub fn help_text(&self) -> String {
        let mut lines = vec!["/help - list available commands".to_string()];
        for h in &self.handlers {
            lines.push(format!("{} - {}", h.command(), h.description()));
        }
        lines.join("\n")
    }

    /// Dispatch a raw command line.  Returns `true` when some handler (or
    /// the built-in `/help`) consumed it.
    pub async fn dispatch(&self, raw: &str) -> bool {
        let raw = raw.trim();
        let first = raw.split_whitespace().next().unwrap_or("");
        if first == "/help" {
            println!("{}", self.help_text());
            return true;
        }
        for handler in &self.handlers {
            if first == handler.command() && handler.handle(raw).await {
                return true;
            }
        }
        false
    }
}

/// `/model <name>` — switch the active model.  Mutates the shared model
/// config and emits `config.llm.changed` so the provider gets rebuilt.
pub struct ModelCommand {
    model_config: Arc<Mutex<ModelConfig>>,
    bus: Arc<EventBus>,
}

impl ModelCommand {
    pub fn new(model_config: Arc<Mutex<ModelConfig>>, bus: Arc<EventBus>) -> Self {
        Self { model_config, bus }
    }
}

#[async_trait]
impl CommandHandler for ModelCommand {
    fn command(&self) -> &str {
        "/model"
    }

    fn description(&self) -> &str {
        "switch the active model, e.g. /model gpt-4o-mini"
    }

    async fn handle(&self, raw: &str) -> bool {
        let mut parts = raw.split_whitespace();
        let _cmd = parts.next();
        let Some(model) = parts.next() else {
            let current = self.model_config.lock().expect("model config lock").name.clone();
            println!("current model: {current}");
            return true;
        };
        self.model_config.lock().expect("model config lock").name = model.to_string();
        info!(model, "active model changed");
        self.bus.emit(AgentEvent::LlmConfigChanged { model: model.to_string() });
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
