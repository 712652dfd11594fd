//! Event dispatch.
//!
//! A flat subscriber map stands in for the source's emitter hierarchy:
//! handlers are registered per event name and invoked synchronously with
//! a JSON payload. Emission clones the handler list so subscribers can
//! register or unregister from inside a handler without deadlocking.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registered handler so it can be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerId {
    event: String,
    id: u64,
}

/// Synchronous event bus keyed by event name.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<EventBusInner>,
}

#[derive(Default)]
struct EventBusInner {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`; returns an id for [`EventBus::off`].
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        HandlerId {
            event: event.to_string(),
            id,
        }
    }

    /// Remove a previously registered handler.
    pub fn off(&self, handle: &HandlerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handlers) = inner.handlers.get_mut(&handle.event) {
            handlers.retain(|(id, _)| *id != handle.id);
        }
    }

    /// Invoke every handler registered for `event`.
    pub fn emit(&self, event: &str, payload: &Value) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().unwrap();
            match inner.handlers.get(event) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            handler(payload);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("EventBus")
            .field("events", &inner.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_registered_handlers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        bus.on("server:connected", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit("server:connected", &serde_json::json!({ "id": "s1" }));
        bus.emit("server:disconnected", &serde_json::json!({ "id": "s1" }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let handle = bus.on("tick", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit("tick", &Value::Null);
        bus.off(&handle);
        bus.emit("tick", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_can_register_during_emit() {
        let bus = Arc::new(EventBus::new());
        let other = Arc::clone(&bus);
        bus.on("first", move |_| {
            other.on("second", |_| {});
        });
        bus.emit("first", &Value::Null);
    }
}
