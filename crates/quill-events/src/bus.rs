// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Producer-side event fan-out.
//!
//! Any number of producers call [`EventBus::emit`]; it never blocks.  A
//! subscription covers a *set* of event kinds and owns one FIFO channel
//! drained by a dedicated worker task: every event a producer emits lands
//! in that FIFO in emit order, so a subscriber observing several kinds
//! (like the UI bridge) sees them exactly as produced.  A shared semaphore
//! bounds how many handler invocations run at once (default 10).  Handler
//! panics are caught and logged; they never reach the emitter.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tracing::error;

use crate::{AgentEvent, EventKind};

pub const DEFAULT_HANDLER_POOL_SIZE: usize = 10;

pub type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kinds: HashSet<EventKind>,
    tx: mpsc::UnboundedSender<AgentEvent>,
}

pub struct EventBus {
    subs: Mutex<Vec<Subscription>>,
    limiter: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_pool_size(DEFAULT_HANDLER_POOL_SIZE)
    }

    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
            limiter: Arc::new(Semaphore::new(pool_size.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `handler` to a single kind.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.subscribe_many(vec![kind], handler)
    }

    /// Subscribe `handler` to several kinds through one FIFO, preserving
    /// the relative order of different kinds from the same producer.  The
    /// handler runs on a worker task, one event at a time, bounded by the
    /// shared pool.
    pub fn subscribe_many(&self, kinds: Vec<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
        let limiter = Arc::clone(&self.limiter);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // A closed semaphore means the bus is shutting down.
                let Ok(_permit) = limiter.acquire().await else { break };
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
                if result.is_err() {
                    error!(kind = event.kind().wire_str(), "event handler panicked");
                }
            }
        });

        self.subs.lock().expect("bus lock").push(Subscription {
            id,
            kinds: kinds.into_iter().collect(),
            tx,
        });
        id
    }

    /// Remove a subscription.  Its worker drains already-queued events and
    /// exits.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subs.lock().expect("bus lock").retain(|s| s.id != id);
    }

    /// Extend an existing subscription with another kind.  Returns false
    /// when the subscription no longer exists.
    pub fn add_kind(&self, id: SubscriptionId, kind: EventKind) -> bool {
        let mut subs = self.subs.lock().expect("bus lock");
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.kinds.insert(kind);
                true
            }
            None => false,
        }
    }

    /// Stop routing `kind` to the given subscription.
    pub fn remove_kind(&self, id: SubscriptionId, kind: EventKind) -> bool {
        let mut subs = self.subs.lock().expect("bus lock");
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => sub.kinds.remove(&kind),
            None => false,
        }
    }

    /// Publish an event.  Non-blocking: the event is pushed onto every
    /// matching subscription's FIFO and the call returns immediately.
    pub fn emit(&self, event: AgentEvent) {
        let subs = self.subs.lock().expect("bus lock");
        let kind = event.kind();
        for sub in subs.iter().filter(|s| s.kinds.contains(&kind)) {
            // A send failure means the worker is gone; nothing to do.
            let _ = sub.tx.send(event.clone());
        }
    }

    /// Drop all subscriptions.  Workers finish their queued events and exit.
    pub fn clear(&self) {
        self.subs.lock().expect("bus lock").clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms / 5 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(
            EventKind::TaskStart,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(AgentEvent::TaskStart);
        assert!(wait_until(500, || count.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit(AgentEvent::TaskStop);
    }

    #[tokio::test]
    async fn subscriber_only_sees_its_kinds() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(
            EventKind::MessageDelta,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(AgentEvent::TaskStart);
        bus.emit(AgentEvent::MessageDelta { delta: "x".into() });
        assert!(wait_until(500, || count.load(Ordering::SeqCst) == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_panic_does_not_reach_emitter_or_stop_worker() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe(
            EventKind::Error,
            Arc::new(move |ev| {
                if let AgentEvent::Error { message } = ev {
                    if message == "boom" {
                        panic!("handler exploded");
                    }
                }
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.emit(AgentEvent::Error { message: "boom".into() });
        bus.emit(AgentEvent::Error { message: "fine".into() });
        assert!(
            wait_until(500, || count.load(Ordering::SeqCst) == 1).await,
            "worker must survive the panic and handle the next event"
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(
            EventKind::TaskStart,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.unsubscribe(id);
        bus.emit(AgentEvent::TaskStart);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn add_and_remove_kind_adjust_routing() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(
            EventKind::TaskStart,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(bus.add_kind(id, EventKind::TaskStop));
        bus.emit(AgentEvent::TaskStop);
        assert!(wait_until(500, || count.load(Ordering::SeqCst) == 1).await);

        assert!(bus.remove_kind(id, EventKind::TaskStop));
        bus.emit(AgentEvent::TaskStop);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn multi_kind_subscription_sees_producer_order_across_kinds() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe_many(
            vec![EventKind::MessageStart, EventKind::MessageDelta, EventKind::MessageStop],
            Arc::new(move |ev| {
                s.lock().unwrap().push(ev.kind().wire_str());
            }),
        );
        bus.emit(AgentEvent::MessageStart);
        bus.emit(AgentEvent::MessageDelta { delta: "x".into() });
        bus.emit(AgentEvent::MessageStop);
        assert!(wait_until(500, || seen.lock().unwrap().len() == 3).await);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["agent.message.start", "agent.message.delta", "agent.message.stop"]
        );
    }

    #[tokio::test]
    async fn events_from_one_producer_arrive_in_order() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(
            EventKind::MessageDelta,
            Arc::new(move |ev| {
                if let AgentEvent::MessageDelta { delta } = ev {
                    s.lock().unwrap().push(delta.clone());
                }
            }),
        );
        for i in 0..50 {
            bus.emit(AgentEvent::MessageDelta { delta: format!("{i}") });
        }
        assert!(wait_until(1000, || seen.lock().unwrap().len() == 50).await);
        let seen = seen.lock().unwrap();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(*seen, expected);
    }
}
