// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent orchestrator: drives the user ↔ model ↔ tool loop.
//!
//! One turn runs `stream → parse → checkpoint → approve → execute →
//! reinject` until the model stops calling tools or the `finish_task`
//! sentinel fires.  The loop is single-threaded cooperative: suspension
//! points are awaiting a stream chunk, awaiting a tool result, and
//! awaiting user approval.  Cancellation is checked at each of them.
//!
//! The orchestrator exclusively owns the session; every mutation happens
//! here and the session is flushed after each step.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use quill_config::AgentConfig;
use quill_events::{AgentEvent, EventBus};
use quill_model::{
    CompletedToolCall, CompletionRequest, FinishReason, Message, ModelProvider, ResponseEvent,
    ToolSchema,
};
use quill_tools::{ToolCall, ToolDescriptor, ToolRegistry};

use crate::{
    advisor::AdvisorChain,
    advisors::FinishTaskAdvisor,
    checkpoint::CheckpointStore,
    session::{Session, SessionStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingUser,
    CallingLlm,
    Streaming,
    ParsingTools,
    AwaitingApproval,
    ExecutingTools,
    Terminated,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model finished with text; the agent awaits the next user turn.
    Completed,
    /// The `finish_task` sentinel fired.
    Terminated,
    /// The user cancelled mid-turn; partial output was kept.
    Canceled,
    /// A provider error aborted the turn.
    Aborted,
}

/// The user's answer to an approval prompt.  Cancellation is an explicit
/// variant so call sites must handle it rather than catching an unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Refused,
    Canceled,
}

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &str,
    ) -> ApprovalDecision;
}

/// Approves everything.  Used when `agent.auto_approve` is on and in tests.
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, _: &ToolDescriptor, _: &str) -> ApprovalDecision {
        ApprovalDecision::Approved
    }
}

struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
    announced: bool,
}

pub struct Agent {
    session: Session,
    store: SessionStore,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn ModelProvider>,
    chain: AdvisorChain,
    finish: Arc<FinishTaskAdvisor>,
    checkpoints: Option<Arc<CheckpointStore>>,
    bus: Arc<EventBus>,
    approval: Arc<dyn ApprovalHandler>,
    config: AgentConfig,
    state: AgentState,
    workspace_dir: PathBuf,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Session,
        store: SessionStore,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn ModelProvider>,
        chain: AdvisorChain,
        finish: Arc<FinishTaskAdvisor>,
        checkpoints: Option<Arc<CheckpointStore>>,
        bus: Arc<EventBus>,
        approval: Arc<dyn ApprovalHandler>,
        config: AgentConfig,
        workspace_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            store,
            registry,
            provider,
            chain,
            finish,
            checkpoints,
            bus,
            approval,
            config,
            state: AgentState::Idle,
            workspace_dir,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn workspace_dir(&self) -> &PathBuf {
        &self.workspace_dir
    }

    /// Swap the model provider (e.g. after `/model`).  Session history is
    /// preserved; the next round uses the new provider.
    pub fn set_provider(&mut self, provider: Arc<dyn ModelProvider>) {
        self.provider = provider;
    }

    pub fn provider_model(&self) -> String {
        self.provider.model_name().to_string()
    }

    /// Run one full user turn to completion.
    pub async fn submit(&mut self, user_input: &str) -> anyhow::Result<TurnOutcome> {
        // Keep the sender alive for the whole call so the receiver never
        // reports a spurious cancellation.
        let (_keep_alive, mut cancel) = oneshot::channel::<()>();
        self.submit_with_cancel(user_input, &mut cancel).await
    }

    /// Like [`submit`](Self::submit) but interruptible: when `cancel`
    /// resolves (or its sender is dropped), the current stream or tool is
    /// aborted, the partial assistant message is kept, and the agent rolls
    /// back to awaiting user input.
    pub async fn submit_with_cancel(
        &mut self,
        user_input: &str,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<TurnOutcome> {
        self.finish.reset();
        self.state = AgentState::AwaitingUser;
        self.session.push(Message::user(user_input));
        self.store.save(&self.session);

        self.bus.emit(AgentEvent::TaskStart);
        let mut rounds = 0u32;
        let outcome = loop {
            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                warn!(max = self.config.max_tool_rounds, "tool-round budget exhausted");
                break TurnOutcome::Completed;
            }
            match self.run_round(cancel).await? {
                RoundOutcome::Continue => continue,
                RoundOutcome::Done(outcome) => break outcome,
            }
        };

        self.bus.emit(AgentEvent::TaskStop);
        self.state = match outcome {
            TurnOutcome::Terminated => AgentState::Terminated,
            // Clean completion parks the agent idle; aborted and cancelled
            // turns roll straight back to awaiting user input.
            TurnOutcome::Completed => AgentState::Idle,
            TurnOutcome::Canceled | TurnOutcome::Aborted => AgentState::AwaitingUser,
        };
        Ok(outcome)
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.registry
            .list_descriptors()
            .into_iter()
            .map(|d| ToolSchema {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect()
    }

    /// One model round: stream the response, append it, run its tools.
    async fn run_round(
        &mut self,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<RoundOutcome> {
        let tools = if self.provider.caps().supports_tools {
            self.tool_schemas()
        } else {
            Vec::new()
        };
        let request = CompletionRequest {
            model: self.provider.model_name().to_string(),
            messages: self.session.messages.clone(),
            tools,
            stream: true,
            ..Default::default()
        };
        let request = self.chain.before_stream(request).await;
        // A transcript whose tool pairing broke (advisor bug, corrupt
        // resume) would poison every later request; abort loudly instead.
        if !crate::context::validate_tool_pairing(&request.messages) {
            return Err(crate::error::InvariantViolation(
                "tool-call pairing broken in outgoing request".into(),
            )
            .into());
        }

        self.state = AgentState::CallingLlm;
        let mut stream = match self.provider.stream(request).await {
            Ok(s) => s,
            Err(e) => {
                warn!("provider stream failed: {e}");
                self.bus.emit(AgentEvent::Error { message: e.to_string() });
                return Ok(RoundOutcome::Done(TurnOutcome::Aborted));
            }
        };

        self.state = AgentState::Streaming;
        self.bus.emit(AgentEvent::MessageStart);

        let mut text = String::new();
        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();
        let mut finish_reason: Option<FinishReason> = None;

        loop {
            let item = tokio::select! {
                biased;
                _ = &mut *cancel => {
                    // Dropping the stream closes the provider transport.
                    drop(stream);
                    self.commit_partial(&text);
                    self.bus.emit(AgentEvent::MessageStop);
                    return Ok(RoundOutcome::Done(TurnOutcome::Canceled));
                }
                item = stream.next() => item,
            };

            let Some(item) = item else { break };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Mid-stream failure: keep whatever already streamed,
                    // marked so follow-up turns can reason about it.
                    warn!("stream error: {e}");
                    if !text.is_empty() {
                        let content = format!("{text}\n<error>{e}</error>");
                        self.session.push(Message::assistant(content));
                        self.store.save(&self.session);
                    }
                    self.bus.emit(AgentEvent::MessageStop);
                    self.bus.emit(AgentEvent::Error { message: e.to_string() });
                    return Ok(RoundOutcome::Done(TurnOutcome::Aborted));
                }
            };

            match self.chain.after_stream(chunk).await {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    text.push_str(&delta);
                    self.bus.emit(AgentEvent::MessageDelta { delta });
                }
                ResponseEvent::TextDelta(_) => {}
                ResponseEvent::ToolCallDelta { index, id, name, arguments } => {
                    let entry = pending.entry(index).or_insert_with(|| PendingToolCall {
                        id: String::new(),
                        name: String::new(),
                        args_buf: String::new(),
                        announced: false,
                    });
                    if !id.is_empty() {
                        entry.id = id;
                    }
                    if !name.is_empty() && entry.name.is_empty() {
                        entry.name = name;
                    }
                    entry.args_buf.push_str(&arguments);
                    // Announce as soon as the name is known so the UI can
                    // show a spinner before arguments finish streaming.
                    if !entry.announced && !entry.name.is_empty() {
                        entry.announced = true;
                        self.bus.emit(AgentEvent::ToolCallStart {
                            name: entry.name.clone(),
                            id: entry.id.clone(),
                        });
                    }
                }
                ResponseEvent::Finish(reason) => finish_reason = Some(reason),
                ResponseEvent::Usage { .. } => {}
                ResponseEvent::Done => break,
                ResponseEvent::Error(msg) => warn!("model stream warning: {msg}"),
            }
        }
        drop(stream);
        self.bus.emit(AgentEvent::MessageStop);

        self.state = AgentState::ParsingTools;
        let calls = assemble_tool_calls(pending);
        if finish_reason == Some(FinishReason::ToolCalls) {
            for call in &calls {
                self.bus.emit(AgentEvent::ToolCallReady {
                    name: call.name.clone(),
                    id: call.id.clone(),
                    arguments: call.arguments.clone(),
                });
            }
        }

        if !text.is_empty() {
            self.session.push(Message::assistant(&text));
        }
        for call in &calls {
            self.session.push(Message::tool_call(&call.id, &call.name, &call.arguments));
        }
        self.store.save(&self.session);

        if calls.is_empty() {
            let outcome = if self.finish.finish_requested() {
                TurnOutcome::Terminated
            } else {
                TurnOutcome::Completed
            };
            return Ok(RoundOutcome::Done(outcome));
        }

        if let Some(outcome) = self.execute_tool_calls(&calls, cancel).await {
            return Ok(RoundOutcome::Done(outcome));
        }

        if self.finish.finish_requested() {
            return Ok(RoundOutcome::Done(TurnOutcome::Terminated));
        }
        Ok(RoundOutcome::Continue)
    }

    /// Execute the round's tool calls in order.  Returns `Some(outcome)`
    /// when the turn must end early (cancellation); `None` to loop back to
    /// the model.
    async fn execute_tool_calls(
        &mut self,
        calls: &[CompletedToolCall],
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<TurnOutcome> {
        for (i, call) in calls.iter().enumerate() {
            // Missing tool: tell the model and keep going.
            let Some(tool) = self.registry.get(&call.name) else {
                self.push_tool_result(call, format!("{} is not found", call.name));
                continue;
            };
            let descriptor = tool.descriptor();

            if descriptor.permission.mutates_workspace() {
                self.checkpoint_before(call).await;
            }

            if descriptor.approval_required && !self.config.auto_approve {
                self.state = AgentState::AwaitingApproval;
                let decision = tokio::select! {
                    biased;
                    _ = &mut *cancel => ApprovalDecision::Canceled,
                    d = self.approval.request_approval(&descriptor, &call.arguments) => d,
                };
                match decision {
                    ApprovalDecision::Approved => {}
                    ApprovalDecision::Refused => {
                        self.push_tool_result(
                            call,
                            format!("User refused to execute the tool: {}", call.name),
                        );
                        continue;
                    }
                    ApprovalDecision::Canceled => {
                        self.cancel_remaining(&calls[i..]);
                        return Some(TurnOutcome::Canceled);
                    }
                }
            }

            // Arguments are parsed only now; malformed JSON becomes a tool
            // error the model can see, never a crash.
            let args = if call.arguments.trim().is_empty() {
                Ok(json!({}))
            } else {
                serde_json::from_str::<serde_json::Value>(&call.arguments)
            };
            let args = match args {
                Ok(v) => v,
                Err(e) => {
                    self.push_tool_result(call, format!("invalid tool arguments: {e}"));
                    continue;
                }
            };

            self.state = AgentState::ExecutingTools;
            let tool_call =
                ToolCall { id: call.id.clone(), name: call.name.clone(), args };
            let output = tokio::select! {
                biased;
                _ = &mut *cancel => {
                    self.cancel_remaining(&calls[i..]);
                    return Some(TurnOutcome::Canceled);
                }
                out = tool.invoke(&tool_call) => out,
            };
            debug!(tool = %call.name, is_error = output.is_error, "tool finished");
            self.push_tool_result(call, output.content);
        }
        None
    }

    async fn checkpoint_before(&mut self, call: &CompletedToolCall) {
        if !self.config.checkpoints {
            return;
        }
        let Some(store) = &self.checkpoints else { return };
        match store.snapshot(&call.name).await {
            Ok(hash) => {
                let args: serde_json::Value = serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| json!({ "raw": call.arguments }));
                store.write_sidecar(Some(&hash), &call.name, &args, None);
            }
            Err(e) => {
                // Never fatal to the turn: the tool still runs, just
                // without a restore point.
                warn!(tool = %call.name, "checkpoint snapshot failed: {e}");
            }
        }
    }

    fn push_tool_result(&mut self, call: &CompletedToolCall, content: String) {
        self.bus.emit(AgentEvent::ToolResult {
            name: call.name.clone(),
            id: call.id.clone(),
            result: content.clone(),
        });
        self.session.push(Message::tool_result(&call.id, content));
        self.store.save(&self.session);
    }

    /// Close out every not-yet-answered call so the transcript keeps its
    /// call/result pairing even on a cancelled turn.
    fn cancel_remaining(&mut self, remaining: &[CompletedToolCall]) {
        for call in remaining {
            self.push_tool_result(call, "Tool execution canceled by user".to_string());
        }
    }

    fn commit_partial(&mut self, text: &str) {
        if !text.is_empty() {
            self.session.push(Message::assistant(text));
            self.store.save(&self.session);
        }
    }
}

enum RoundOutcome {
    Continue,
    Done(TurnOutcome),
}

/// Flush accumulated fragments into ordered, dispatchable calls.  Calls
/// with no name cannot be dispatched and are dropped; calls with no id get
/// a synthetic one so the transcript stays well-formed.
fn assemble_tool_calls(pending: BTreeMap<u32, PendingToolCall>) -> Vec<CompletedToolCall> {
    let mut calls = Vec::with_capacity(pending.len());
    for (i, (_, ptc)) in pending.into_iter().enumerate() {
        if ptc.name.is_empty() {
            warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
            continue;
        }
        let id = if ptc.id.is_empty() { format!("tc_synthetic_{i}") } else { ptc.id };
        calls.push(CompletedToolCall { id, name: ptc.name, arguments: ptc.args_buf });
    }
    calls
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
