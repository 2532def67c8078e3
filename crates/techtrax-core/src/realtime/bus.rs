// ── Subscription bus ──
//
// Name-filtered fan-out for pushed events. Each subscriber owns an
// unbounded queue so a slow consumer never stalls the channel task, and
// dropping the `Subscription` unregisters it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Sent by the server.
    Server,
    /// Synthesized by the connection (`connect`, `connected`,
    /// `disconnect`, `connect_error`).
    Lifecycle,
}

/// One delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub name: String,
    pub payload: Value,
    /// Connection generation the event arrived on.
    pub generation: u64,
    pub kind: EventKind,
}

impl PushEvent {
    /// String field of an object payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

struct Listener {
    /// `None` receives everything.
    names: Option<HashSet<String>>,
    tx: mpsc::UnboundedSender<Arc<PushEvent>>,
}

impl Listener {
    fn wants(&self, name: &str) -> bool {
        self.names.as_ref().is_none_or(|n| n.contains(name))
    }
}

pub(crate) struct EventBus {
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new connection generation; server events from older ones
    /// are dropped from here on.
    pub(crate) fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn subscribe(self: &Arc<Self>, names: Option<HashSet<String>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // a closed bus hands out subscriptions that end immediately
        if !self.closed.load(Ordering::Acquire) {
            self.listeners.insert(id, Listener { names, tx });
        }
        trace!(id, "subscriber registered");
        Subscription {
            id,
            rx,
            bus: Arc::clone(self),
        }
    }

    pub(crate) fn publish(&self, event: PushEvent) {
        if self.is_stale(&event) {
            trace!(name = %event.name, generation = event.generation, "dropping stale event");
            return;
        }

        let event = Arc::new(event);
        let mut closed = Vec::new();
        for entry in &self.listeners {
            if entry.wants(&event.name) && entry.tx.send(Arc::clone(&event)).is_err() {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.listeners.remove(&id);
        }
    }

    /// Drop every listener so pending `recv` calls return `None`.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.listeners.clear();
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn is_stale(&self, event: &PushEvent) -> bool {
        event.kind == EventKind::Server && event.generation != self.generation()
    }
}

/// Scoped registration on the bus. Unregisters on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<PushEvent>>,
    bus: Arc<EventBus>,
}

impl Subscription {
    /// Next event for this subscriber, or `None` once the connection is
    /// gone. Server events queued before a reconnect are skipped.
    pub async fn recv(&mut self) -> Option<Arc<PushEvent>> {
        loop {
            let event = self.rx.recv().await?;
            if !self.bus.is_stale(&event) {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<PushEvent>> {
        while let Ok(event) = self.rx.try_recv() {
            if !self.bus.is_stale(&event) {
                return Some(event);
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.listeners.remove(&self.id);
        trace!(id = self.id, "subscriber removed");
    }
}
