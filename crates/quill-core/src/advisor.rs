// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Request/response interceptors around LLM calls.
//!
//! Advisors compose like middleware: `before_*` hooks run in registration
//! order, `after_*` hooks in reverse.  Each hook returns a possibly
//! modified request/chunk; advisors must not depend on each other's
//! internal state — only on the request passing through.
//!
//! Advisors read agent state (tools, model, workspace) through the
//! [`AgentView`] capability handed to them at construction.  The view is
//! read-only; no advisor ever holds a mutable handle on the agent.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use quill_model::{ChatCompletion, CompletionRequest, ResponseEvent};
use quill_tools::ToolDescriptor;

/// Read-only window onto agent state for advisors.
pub trait AgentView: Send + Sync {
    fn tool_descriptors(&self) -> Vec<ToolDescriptor>;
    fn model_name(&self) -> String;
    fn workspace_dir(&self) -> PathBuf;
}

/// Standard [`AgentView`] backed by the shared tool registry.  The model
/// name sits behind a lock so `/model` switches are visible to advisors on
/// the next request.
pub struct RegistryAgentView {
    registry: Arc<quill_tools::ToolRegistry>,
    model_name: std::sync::Mutex<String>,
    workspace_dir: PathBuf,
}

impl RegistryAgentView {
    pub fn new(
        registry: Arc<quill_tools::ToolRegistry>,
        model_name: String,
        workspace_dir: PathBuf,
    ) -> Self {
        Self { registry, model_name: std::sync::Mutex::new(model_name), workspace_dir }
    }

    pub fn set_model_name(&self, name: String) {
        *self.model_name.lock().expect("view lock") = name;
    }
}

impl AgentView for RegistryAgentView {
    fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.list_descriptors()
    }

    fn model_name(&self) -> String {
        self.model_name.lock().expect("view lock").clone()
    }

    fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir.clone()
    }
}

#[async_trait]
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;

    async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
        req
    }

    async fn after_call(&self, resp: ChatCompletion) -> ChatCompletion {
        resp
    }

    async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
        req
    }

    async fn after_stream(&self, chunk: ResponseEvent) -> ResponseEvent {
        chunk
    }
}

/// An ordered advisor list.  Owns nothing but the advisors themselves.
#[derive(Clone, Default)]
pub struct AdvisorChain {
    advisors: Vec<Arc<dyn Advisor>>,
}

impl AdvisorChain {
    pub fn new(advisors: Vec<Arc<dyn Advisor>>) -> Self {
        Self { advisors }
    }

    pub fn push(&mut self, advisor: Arc<dyn Advisor>) {
        self.advisors.push(advisor);
    }

    pub async fn before_call(&self, mut req: CompletionRequest) -> CompletionRequest {
        for advisor in &self.advisors {
            req = advisor.before_call(req).await;
        }
        req
    }

    pub async fn after_call(&self, mut resp: ChatCompletion) -> ChatCompletion {
        for advisor in self.advisors.iter().rev() {
            resp = advisor.after_call(resp).await;
        }
        resp
    }

    pub async fn before_stream(&self, mut req: CompletionRequest) -> CompletionRequest {
        for advisor in &self.advisors {
            req = advisor.before_stream(req).await;
        }
        req
    }

    pub async fn after_stream(&self, mut chunk: ResponseEvent) -> ResponseEvent {
        for advisor in self.advisors.iter().rev() {
            chunk = advisor.after_stream(chunk).await;
        }
        chunk
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records hook invocations into a shared log.
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Advisor for Recorder {
        fn name(&self) -> &str {
            self.tag
        }

        async fn before_call(&self, req: CompletionRequest) -> CompletionRequest {
            self.log.lock().unwrap().push(format!("before:{}", self.tag));
            req
        }

        async fn after_call(&self, resp: ChatCompletion) -> ChatCompletion {
            self.log.lock().unwrap().push(format!("after:{}", self.tag));
            resp
        }

        async fn before_stream(&self, req: CompletionRequest) -> CompletionRequest {
            self.log.lock().unwrap().push(format!("before_stream:{}", self.tag));
            req
        }

        async fn after_stream(&self, chunk: ResponseEvent) -> ResponseEvent {
            self.log.lock().unwrap().push(format!("after_stream:{}", self.tag));
            chunk
        }
    }

    fn chain_of_three() -> (AdvisorChain, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = AdvisorChain::new(vec![
            Arc::new(Recorder { tag: "A", log: Arc::clone(&log) }),
            Arc::new(Recorder { tag: "B", log: Arc::clone(&log) }),
            Arc::new(Recorder { tag: "C", log: Arc::clone(&log) }),
        ]);
        (chain, log)
    }

    #[tokio::test]
    async fn before_hooks_run_in_registration_order() {
        let (chain, log) = chain_of_three();
        chain.before_call(CompletionRequest::default()).await;
        assert_eq!(*log.lock().unwrap(), vec!["before:A", "before:B", "before:C"]);
    }

    #[tokio::test]
    async fn after_hooks_run_in_reverse_order() {
        let (chain, log) = chain_of_three();
        chain.after_call(ChatCompletion::default()).await;
        assert_eq!(*log.lock().unwrap(), vec!["after:C", "after:B", "after:A"]);
    }

    #[tokio::test]
    async fn stream_hooks_follow_the_same_ordering() {
        let (chain, log) = chain_of_three();
        chain.before_stream(CompletionRequest::default()).await;
        chain.after_stream(ResponseEvent::Done).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before_stream:A",
                "before_stream:B",
                "before_stream:C",
                "after_stream:C",
                "after_stream:B",
                "after_stream:A",
            ]
        );
    }

    #[tokio::test]
    async fn hooks_can_rewrite_the_request() {
        struct AddMessage;

        #[async_trait]
        impl Advisor for AddMessage {
            fn name(&self) -> &str {
                "add"
            }
            async fn before_call(&self, mut req: CompletionRequest) -> CompletionRequest {
                req.messages.push(quill_model::Message::user("injected"));
                req
            }
        }

        let chain = AdvisorChain::new(vec![Arc::new(AddMessage)]);
        let out = chain.before_call(CompletionRequest::default()).await;
        assert_eq!(out.messages.len(), 1);
    }
}
