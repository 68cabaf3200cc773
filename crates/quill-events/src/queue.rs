// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Consumer-side ordered event queue.
//!
//! Producers (usually the [`EventBridge`](crate::EventBridge)) enqueue from
//! any thread; [`UiEventQueue::process_events`] is called only from the
//! render thread and executes handlers synchronously, in registration
//! priority order (higher numeric priority first).
//!
//! Per-kind debouncing collapses bursts: while a kind is debounced, only
//! the latest payload survives, and it is released once its delay elapses.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::error;

use crate::{AgentEvent, EventKind};

type QueueHandler = std::sync::Arc<dyn Fn(&AgentEvent) + Send + Sync>;

struct HandlerInfo {
    priority: i32,
    handler: QueueHandler,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<AgentEvent>,
    debounce: HashMap<EventKind, Duration>,
    /// kind → (release deadline, latest payload)
    pending: HashMap<EventKind, (Instant, AgentEvent)>,
}

pub struct UiEventQueue {
    inner: Mutex<Inner>,
    handlers: Mutex<HashMap<EventKind, Vec<HandlerInfo>>>,
}

impl UiEventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Debounce `kind`: bursts within `delay` collapse to one queued event
    /// carrying the payload of the last emit.
    pub fn set_debounce(&self, kind: EventKind, delay: Duration) {
        self.inner.lock().expect("queue lock").debounce.insert(kind, delay);
    }

    /// Register a handler.  Higher `priority` runs first.
    pub fn subscribe(&self, kind: EventKind, priority: i32, handler: QueueHandler) {
        let mut handlers = self.handlers.lock().expect("handlers lock");
        let list = handlers.entry(kind).or_default();
        list.push(HandlerInfo { priority, handler });
        // Stable sort keeps registration order among equal priorities.
        list.sort_by_key(|h| std::cmp::Reverse(h.priority));
    }

    /// Enqueue an event.  Thread-safe; never blocks on handlers.
    pub fn emit(&self, event: AgentEvent) {
        let mut inner = self.inner.lock().expect("queue lock");
        let kind = event.kind();
        match inner.debounce.get(&kind).copied() {
            Some(delay) => {
                let deadline = Instant::now() + delay;
                // Replacing the slot both updates the payload and pushes the
                // release deadline out — exactly the burst-collapse contract.
                inner.pending.insert(kind, (deadline, event));
            }
            None => inner.queue.push_back(event),
        }
    }

    /// Number of immediately processable events (excludes debounce slots
    /// still waiting out their delay).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain up to `max_events` within `time_budget`, executing handlers
    /// synchronously.  Returns the number of events processed.  Call only
    /// from the render thread.
    pub fn process_events(
        &self,
        max_events: Option<usize>,
        time_budget: Option<Duration>,
    ) -> usize {
        let start = Instant::now();
        let mut processed = 0;

        self.flush_expired_debounce();

        loop {
            if let Some(max) = max_events {
                if processed >= max {
                    break;
                }
            }
            if let Some(budget) = time_budget {
                if start.elapsed() >= budget {
                    break;
                }
            }

            let Some(event) = self.inner.lock().expect("queue lock").queue.pop_front() else {
                break;
            };
            self.run_handlers(&event);
            processed += 1;
        }

        processed
    }

    fn flush_expired_debounce(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        let now = Instant::now();
        let expired: Vec<EventKind> = inner
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        // Release in deadline order so two expired kinds keep their relative
        // emit timing.
        let mut released: Vec<(Instant, AgentEvent)> = expired
            .into_iter()
            .filter_map(|k| inner.pending.remove(&k))
            .collect();
        released.sort_by_key(|(deadline, _)| *deadline);
        for (_, event) in released {
            inner.queue.push_back(event);
        }
    }

    fn run_handlers(&self, event: &AgentEvent) {
        // Clone the handler Arcs out of the lock so handlers may subscribe
        // or emit without deadlocking.
        let handlers: Vec<QueueHandler> = {
            let map = self.handlers.lock().expect("handlers lock");
            map.get(&event.kind())
                .map(|list| list.iter().map(|h| std::sync::Arc::clone(&h.handler)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
            if result.is_err() {
                error!(kind = event.kind().wire_str(), "ui event handler panicked");
            }
        }
    }

    /// Drop all queued events, debounce slots and handlers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.queue.clear();
        inner.pending.clear();
        self.handlers.lock().expect("handlers lock").clear();
    }
}

impl Default for UiEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn collector(queue: &UiEventQueue, kind: EventKind) -> Arc<StdMutex<Vec<String>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        queue.subscribe(
            kind,
            0,
            Arc::new(move |ev| {
                if let AgentEvent::MessageDelta { delta } = ev {
                    s.lock().unwrap().push(delta.clone());
                }
            }),
        );
        seen
    }

    #[test]
    fn events_processed_in_fifo_order() {
        let q = UiEventQueue::new();
        let seen = collector(&q, EventKind::MessageDelta);
        for i in 0..5 {
            q.emit(AgentEvent::MessageDelta { delta: format!("{i}") });
        }
        let n = q.process_events(None, None);
        assert_eq!(n, 5);
        assert_eq!(*seen.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn max_events_bounds_the_drain() {
        let q = UiEventQueue::new();
        for i in 0..10 {
            q.emit(AgentEvent::MessageDelta { delta: format!("{i}") });
        }
        assert_eq!(q.process_events(Some(3), None), 3);
        assert_eq!(q.len(), 7);
    }

    #[test]
    fn handlers_run_in_priority_order() {
        let q = UiEventQueue::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        for (priority, tag) in [(0, "low"), (10, "high"), (5, "mid")] {
            let o = Arc::clone(&order);
            q.subscribe(
                EventKind::TaskStart,
                priority,
                Arc::new(move |_| o.lock().unwrap().push(tag)),
            );
        }
        q.emit(AgentEvent::TaskStart);
        q.process_events(None, None);
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[test]
    fn debounce_collapses_burst_to_last_payload() {
        let q = UiEventQueue::new();
        let seen = collector(&q, EventKind::MessageDelta);
        q.set_debounce(EventKind::MessageDelta, Duration::from_millis(20));

        for i in 0..8 {
            q.emit(AgentEvent::MessageDelta { delta: format!("{i}") });
        }
        // Still inside the debounce window: nothing processable yet.
        assert_eq!(q.process_events(None, None), 0);

        std::thread::sleep(Duration::from_millis(30));
        let n = q.process_events(None, None);
        assert_eq!(n, 1, "burst must collapse to exactly one event");
        assert_eq!(*seen.lock().unwrap(), vec!["7"], "last payload wins");
    }

    #[test]
    fn non_debounced_kinds_are_unaffected() {
        let q = UiEventQueue::new();
        q.set_debounce(EventKind::MessageDelta, Duration::from_millis(50));
        q.emit(AgentEvent::TaskStart);
        q.emit(AgentEvent::TaskStop);
        assert_eq!(q.process_events(None, None), 2);
    }

    #[test]
    fn handler_panic_is_contained() {
        let q = UiEventQueue::new();
        q.subscribe(EventKind::TaskStart, 0, Arc::new(|_| panic!("ui handler died")));
        let seen = Arc::new(StdMutex::new(0));
        let s = Arc::clone(&seen);
        q.subscribe(
            EventKind::TaskStart,
            -1,
            Arc::new(move |_| {
                *s.lock().unwrap() += 1;
            }),
        );
        q.emit(AgentEvent::TaskStart);
        q.process_events(None, None);
        assert_eq!(*seen.lock().unwrap(), 1, "later handlers still run");
    }

    #[test]
    fn time_budget_stops_the_drain() {
        let q = UiEventQueue::new();
        q.subscribe(
            EventKind::MessageDelta,
            0,
            Arc::new(|_| std::thread::sleep(Duration::from_millis(10))),
        );
        for i in 0..10 {
            q.emit(AgentEvent::MessageDelta { delta: format!("{i}") });
        }
        let n = q.process_events(None, Some(Duration::from_millis(25)));
        assert!(n < 10, "drain must stop when the budget is spent, got {n}");
        assert!(n >= 1);
    }
}
