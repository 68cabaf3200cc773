// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{ChatCompletion, CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ProviderError>> + Send>>;

/// What a provider/model combination can do.  Consulted by the orchestrator
/// when building requests (e.g. tools are omitted for providers without
/// tool support).
#[derive(Debug, Clone, Copy)]
pub struct ProviderCaps {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub supports_json_schema: bool,
}

impl Default for ProviderCaps {
    fn default() -> Self {
        Self {
            supports_streaming: true,
            supports_tools: true,
            supports_vision: false,
            supports_json_schema: false,
        }
    }
}

/// LLM transport / HTTP failure.  `retryable()` drives the backoff loop:
/// transport errors, 5xx and timeouts retry; 4xx is fatal.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::Fatal(_) => false,
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    fn caps(&self) -> ProviderCaps {
        ProviderCaps::default()
    }

    /// Blocking (non-streaming) completion.  Returns once the terminal
    /// chunk has arrived.  Retried internally per the provider's policy.
    async fn call(&self, req: CompletionRequest) -> Result<ChatCompletion, ProviderError>;

    /// Streaming completion.  The returned sequence is lazy and finite;
    /// dropping it cancels the request and closes the underlying transport
    /// promptly.  Once the first chunk has been observed the request is
    /// never retried — partial output has already been emitted.
    async fn stream(&self, req: CompletionRequest) -> Result<ResponseStream, ProviderError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(ProviderError::Transport("reset".into()).retryable());
        assert!(ProviderError::Timeout(60).retryable());
    }

    #[test]
    fn server_errors_are_retryable_client_errors_not() {
        assert!(ProviderError::Http { status: 503, body: String::new() }.retryable());
        assert!(!ProviderError::Http { status: 401, body: String::new() }.retryable());
        assert!(!ProviderError::Http { status: 400, body: String::new() }.retryable());
    }

    #[test]
    fn fatal_is_never_retryable() {
        assert!(!ProviderError::Fatal("bad request".into()).retryable());
    }

    #[test]
    fn default_caps_stream_and_tools() {
        let caps = ProviderCaps::default();
        assert!(caps.supports_streaming);
        assert!(caps.supports_tools);
        assert!(!caps.supports_vision);
    }
}
