// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use quill_model::CompletionRequest;

use crate::{advisor::Advisor, context::ContextManager};

/// Wraps the [`ContextManager`] into the advisor chain so every outgoing
/// request is trimmed to the token budget.
pub struct ContextAdvisor {
    manager: ContextManager,
}

impl ContextAdvisor {
    pub fn new(manager: ContextManager) -> Self {
        Self { manager }
    }

    async fn trim(&self, mut req: CompletionRequest) -> CompletionRequest {
        req.messages = self.manager.enforce(std::mem::take(&mut req.messages)).await;
        req
    }
}

#[async_trait]
impl Advisor for ContextAdvisor {
    fn name(&self) -> &str {
        "context"
    }

    async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
        self.trim(req).await
    }

    async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
        self.trim(req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
