// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod finish_task;
mod request_log;
mod system_prompt;

pub use finish_task::{FinishTaskAdvisor, FinishTaskTool, FINISH_TASK_TOOL};
pub use request_log::RequestLogAdvisor;
pub use system_prompt::SystemPromptAdvisor;

mod context_advisor;
pub use context_advisor::ContextAdvisor;
