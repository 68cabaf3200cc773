// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bridge;
mod bus;
mod event;
mod queue;

pub use bridge::EventBridge;
pub use bus::{EventBus, SubscriptionId};
pub use event::{AgentEvent, EventKind};
pub use queue::UiEventQueue;
