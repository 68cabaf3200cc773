// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The closed set of events the orchestrator emits.  Routing is by
//! [`EventKind`] (a plain enum, cheap to hash); the dotted wire strings
//! exist only for logs and serialized output.

/// Events emitted by the agent during a turn.  Consumers (composer,
/// loggers) subscribe per [`EventKind`] on the bus or the UI queue.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A user turn has started processing.
    TaskStart,
    /// The turn is complete and the agent is idle again.
    TaskStop,
    /// An assistant message is about to stream.
    MessageStart,
    /// A text chunk streamed from the model.
    MessageDelta { delta: String },
    /// The assistant message finished streaming.
    MessageStop,
    /// The model named a tool call; arguments may still be streaming.
    ToolCallStart { name: String, id: String },
    /// The tool call is fully assembled and about to execute.
    ToolCallReady { name: String, id: String, arguments: String },
    /// A tool finished; `result` is what gets appended to the transcript.
    ToolResult { name: String, id: String, result: String },
    /// A recoverable error; the turn was aborted but the session lives on.
    Error { message: String },
    /// The active LLM configuration changed (e.g. via `/model`).
    LlmConfigChanged { model: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TaskStart,
    TaskStop,
    MessageStart,
    MessageDelta,
    MessageStop,
    ToolCallStart,
    ToolCallReady,
    ToolResult,
    Error,
    LlmConfigChanged,
}

impl EventKind {
    /// Every kind, in taxonomy order.  Used to bridge "everything".
    pub const ALL: [EventKind; 10] = [
        EventKind::TaskStart,
        EventKind::TaskStop,
        EventKind::MessageStart,
        EventKind::MessageDelta,
        EventKind::MessageStop,
        EventKind::ToolCallStart,
        EventKind::ToolCallReady,
        EventKind::ToolResult,
        EventKind::Error,
        EventKind::LlmConfigChanged,
    ];

    /// Dotted wire string, for logs and serialized records.
    pub fn wire_str(&self) -> &'static str {
        match self {
            EventKind::TaskStart => "agent.task.start",
            EventKind::TaskStop => "agent.task.stop",
            EventKind::MessageStart => "agent.message.start",
            EventKind::MessageDelta => "agent.message.delta",
            EventKind::MessageStop => "agent.message.stop",
            EventKind::ToolCallStart => "agent.tool.call.start",
            EventKind::ToolCallReady => "agent.tool.call.ready",
            EventKind::ToolResult => "agent.tool.result",
            EventKind::Error => "agent.error",
            EventKind::LlmConfigChanged => "config.llm.changed",
        }
    }
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::TaskStart => EventKind::TaskStart,
            AgentEvent::TaskStop => EventKind::TaskStop,
            AgentEvent::MessageStart => EventKind::MessageStart,
            AgentEvent::MessageDelta { .. } => EventKind::MessageDelta,
            AgentEvent::MessageStop => EventKind::MessageStop,
            AgentEvent::ToolCallStart { .. } => EventKind::ToolCallStart,
            AgentEvent::ToolCallReady { .. } => EventKind::ToolCallReady,
            AgentEvent::ToolResult { .. } => EventKind::ToolResult,
            AgentEvent::Error { .. } => EventKind::Error,
            AgentEvent::LlmConfigChanged { .. } => EventKind::LlmConfigChanged,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_maps_to_its_kind() {
        assert_eq!(AgentEvent::TaskStart.kind(), EventKind::TaskStart);
        assert_eq!(
            AgentEvent::MessageDelta { delta: "x".into() }.kind(),
            EventKind::MessageDelta
        );
        assert_eq!(
            AgentEvent::ToolCallStart { name: "t".into(), id: "1".into() }.kind(),
            EventKind::ToolCallStart
        );
    }

    #[test]
    fn wire_strings_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in EventKind::ALL {
            assert!(seen.insert(kind.wire_str()), "duplicate wire string for {kind:?}");
        }
    }

    #[test]
    fn all_covers_every_kind() {
        assert_eq!(EventKind::ALL.len(), 10);
    }
}
