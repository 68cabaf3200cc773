// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name forwarded to the provider API.
    pub name: String,
    /// API base that ends before `/chat/completions`.
    pub base_url: String,
    /// Explicit API key.  Supports `${NAME}` references; when empty the
    /// loader falls back to the environment variable named by
    /// `api_key_env` (default `OPENAI_API_KEY`).
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Per-call timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum retry attempts for retryable provider errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base retry delay in milliseconds; attempt N waits `base × N`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Context window of the model, in tokens.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// Model used for context summarization.  Falls back to `name`.
    pub summarizer: Option<String>,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_max_context_length() -> usize {
    128_000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            max_tokens: Some(4096),
            temperature: Some(0.2),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_context_length: default_max_context_length(),
            summarizer: None,
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of autonomous tool-call rounds before stopping.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Execute every tool without prompting, regardless of the tool's
    /// `approval_required` flag.
    #[serde(default)]
    pub auto_approve: bool,
    /// System prompt override; leave None to use the built-in template.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Write workspace checkpoints before write/execute tools.
    #[serde(default = "default_true")]
    pub checkpoints: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            auto_approve: false,
            system_prompt: None,
            checkpoints: true,
        }
    }
}

/// Strategy used to keep the transcript within the model's context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    #[default]
    SlidingWindow,
    SummarizeOlder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub strategy: ContextStrategy,
    /// Sliding window: maximum number of messages kept.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Summarize-older: token fraction of the context window that triggers
    /// summarization (0.0–1.0).
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Summarize-older: number of recent messages preserved verbatim.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
}

fn default_window_size() -> usize {
    100
}
fn default_threshold() -> f32 {
    0.8
}
fn default_keep_recent() -> usize {
    8
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::SlidingWindow,
            window_size: default_window_size(),
            threshold: default_threshold(),
            keep_recent: default_keep_recent(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
