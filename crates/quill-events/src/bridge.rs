// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bus → UI-queue forwarding.
//!
//! The bridge holds exactly one multi-kind bus subscription whose handler
//! re-emits onto the [`UiEventQueue`].  Because the subscription drains a
//! single FIFO, the UI sees events in the order the orchestrator produced
//! them — across kinds, not just within one — even though other bus
//! handlers ran in parallel.

use std::sync::{Arc, Mutex};

use crate::{bus::SubscriptionId, EventBus, EventKind, UiEventQueue};

pub struct EventBridge {
    bus: Arc<EventBus>,
    ui_queue: Arc<UiEventQueue>,
    kinds: Vec<EventKind>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl EventBridge {
    pub fn new(bus: Arc<EventBus>, ui_queue: Arc<UiEventQueue>, kinds: Vec<EventKind>) -> Self {
        Self { bus, ui_queue, kinds, subscription: Mutex::new(None) }
    }

    /// Bridge every kind in the taxonomy.
    pub fn all_kinds(bus: Arc<EventBus>, ui_queue: Arc<UiEventQueue>) -> Self {
        Self::new(bus, ui_queue, EventKind::ALL.to_vec())
    }

    pub fn start(&self) {
        let mut sub = self.subscription.lock().expect("bridge lock");
        if sub.is_some() {
            return;
        }
        let queue = Arc::clone(&self.ui_queue);
        let id = self
            .bus
            .subscribe_many(self.kinds.clone(), Arc::new(move |ev| queue.emit(ev.clone())));
        *sub = Some(id);
    }

    pub fn stop(&self) {
        if let Some(id) = self.subscription.lock().expect("bridge lock").take() {
            self.bus.unsubscribe(id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.lock().expect("bridge lock").is_some()
    }

    /// Start forwarding an additional kind at runtime.  No-op while the
    /// bridge is stopped.
    pub fn add_kind(&self, kind: EventKind) {
        if let Some(id) = *self.subscription.lock().expect("bridge lock") {
            self.bus.add_kind(id, kind);
        }
    }

    pub fn remove_kind(&self, kind: EventKind) {
        if let Some(id) = *self.subscription.lock().expect("bridge lock") {
            self.bus.remove_kind(id, kind);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
