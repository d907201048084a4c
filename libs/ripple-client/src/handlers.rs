//! Local event listener registry.
//!
//! Listeners are client-local state — they survive reconnects untouched and
//! are safe to register before the connection exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Returned by `on`; pass back to `off` to remove that one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerId {
    event: String,
    id: u64,
}

impl HandlerId {
    pub fn event(&self) -> &str {
        &self.event
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, handler: Handler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        HandlerId {
            event: event.to_string(),
            id,
        }
    }

    /// Remove one listener. Returns whether it was still registered.
    pub fn off(&self, handle: &HandlerId) -> bool {
        let removed = match self.handlers.get_mut(&handle.event) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(id, _)| *id != handle.id);
                entry.len() != before
            }
            None => false,
        };
        self.handlers.remove_if(&handle.event, |_, entry| entry.is_empty());
        removed
    }

    /// Remove every listener for an event. Returns how many were removed.
    pub fn off_all(&self, event: &str) -> usize {
        self.handlers
            .remove(event)
            .map(|(_, entry)| entry.len())
            .unwrap_or(0)
    }

    /// Invoke every listener registered for `event`. Listeners run outside
    /// the map lock, so they may re-register freely.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let snapshot: Vec<Handler> = match self.handlers.get(event) {
            Some(entry) => entry.iter().map(|(_, handler)| handler.clone()).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(data);
        }
        snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_invokes_only_matching_listeners() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.on("ORDER_UPDATED", counter_handler(hits.clone()));
        registry.on("OTHER", counter_handler(hits.clone()));

        let count = registry.dispatch("ORDER_UPDATED", &serde_json::json!({}));
        assert_eq!(count, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_without_listeners_is_a_noop() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.dispatch("NOPE", &serde_json::json!({})), 0);
    }

    #[test]
    fn off_removes_one_listener() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let first = registry.on("E", counter_handler(hits.clone()));
        registry.on("E", counter_handler(hits.clone()));

        assert!(registry.off(&first));
        assert!(!registry.off(&first)); // already gone

        registry.dispatch("E", &serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_all_removes_every_listener_for_event() {
        let registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.on("E", counter_handler(hits.clone()));
        registry.on("E", counter_handler(hits.clone()));

        assert_eq!(registry.off_all("E"), 2);
        assert_eq!(registry.dispatch("E", &serde_json::json!({})), 0);
    }

    #[test]
    fn listener_payload_is_passed_through() {
        let registry = HandlerRegistry::new();
        let seen: Arc<std::sync::Mutex<Option<Value>>> =
            Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        registry.on(
            "E",
            Arc::new(move |value| {
                *seen_clone.lock().unwrap() = Some(value.clone());
            }),
        );

        registry.dispatch("E", &serde_json::json!({ "n": 7 }));
        assert_eq!(seen.lock().unwrap().as_ref().unwrap()["n"], 7);
    }
}
