// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod advisor;
pub mod advisors;
mod agent;
mod checkpoint;
mod context;
mod error;
mod prompts;
mod session;

pub use advisor::{Advisor, AdvisorChain, AgentView, RegistryAgentView};
pub use agent::{
    Agent, AgentState, ApprovalDecision, ApprovalHandler, AutoApprove, TurnOutcome,
};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use context::{validate_tool_pairing, ContextManager};
pub use error::InvariantViolation;
pub use prompts::{agent_role_prompt, render_template, PromptVars};
pub use session::{Session, SessionStore, SessionSummary};
