//! # Event Bus
//!
//! Synchronous typed listener registries.
//!
//! - [`ListenerSet`] holds listeners for a single event stream (reporter, cache).
//! - [`EventBus`] keys listener sets by event kind (connection manager).
//!
//! Handlers run on the emitting thread, outside the registry lock, each inside
//! its own `catch_unwind`: a panicking listener is logged and the remaining
//! listeners still run. Registering the same handler twice yields two ids and
//! two invocations per emit.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Handler<P> = Arc<dyn Fn(&P) + Send + Sync + 'static>;

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn invoke_all<P>(stream: &str, handlers: &[Handler<P>], payload: &P) -> usize {
    let mut delivered = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(()) => delivered += 1,
            Err(panic) => {
                warn!(
                    stream = %stream,
                    panic = %panic_message(panic.as_ref()),
                    "Listener panicked"
                );
            }
        }
    }
    delivered
}

// =============================================================================
// Listener Set
// =============================================================================

/// Listeners for one event stream.
pub struct ListenerSet<P> {
    name: &'static str,
    listeners: Mutex<Vec<(ListenerId, Handler<P>)>>,
}

impl<P> ListenerSet<P> {
    /// Creates an empty set. `name` only appears in logs.
    pub fn new(name: &'static str) -> Self {
        ListenerSet {
            name,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, handler: impl Fn(&P) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Calls every listener; returns how many completed without panicking.
    pub fn emit(&self, payload: &P) -> usize {
        let snapshot: Vec<Handler<P>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        invoke_all(self.name, &snapshot, payload)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Listeners keyed by event kind.
pub struct EventBus<K, P> {
    listeners: Mutex<HashMap<K, Vec<(ListenerId, Handler<P>)>>>,
}

impl<K, P> Default for EventBus<K, P> {
    fn default() -> Self {
        EventBus {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, P> EventBus<K, P>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`.
    pub fn on(&self, kind: K, handler: impl Fn(&P) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one registration. Returns false if it was not found.
    pub fn off(&self, kind: &K, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(handlers) = listeners.get_mut(kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            listeners.remove(kind);
        }
        removed
    }

    /// Delivers `payload` to every listener of `kind`.
    ///
    /// Returns how many listeners completed without panicking.
    pub fn emit(&self, kind: &K, payload: &P) -> usize {
        let snapshot: Vec<Handler<P>> = match self.listeners.lock().get(kind) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };
        invoke_all(&kind.to_string(), &snapshot, payload)
    }

    pub fn listener_count(&self, kind: &K) -> usize {
        self.listeners.lock().get(kind).map_or(0, Vec::len)
    }

    /// Removes every listener of every kind.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus: EventBus<&'static str, u32> = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.on("alert", |_| panic!("listener A failed"));
        let s = seen.clone();
        bus.on("alert", move |value| {
            s.fetch_add(*value as usize, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(&"alert", &7), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_multiset_registration_and_off() {
        let bus: EventBus<&'static str, ()> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handler = {
            let calls = calls.clone();
            move |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = bus.on("open", handler.clone());
        bus.on("open", handler);
        assert_eq!(bus.listener_count(&"open"), 2);

        bus.emit(&"open", &());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(bus.off(&"open", first));
        assert!(!bus.off(&"open", first));
        bus.emit(&"open", &());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handler_may_register_during_emit() {
        let bus: Arc<EventBus<&'static str, ()>> = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on("close", move |_| {
            inner.on("close", |_| {});
        });

        bus.emit(&"close", &());
        assert_eq!(bus.listener_count(&"close"), 2);
    }

    #[test]
    fn test_listener_set() {
        let set: ListenerSet<String> = ListenerSet::new("reporter");
        let last = Arc::new(Mutex::new(String::new()));
        let l = last.clone();
        let id = set.add(move |msg: &String| *l.lock() = msg.clone());

        set.emit(&"hello".to_string());
        assert_eq!(*last.lock(), "hello");
        assert!(set.remove(id));
        assert!(set.is_empty());
    }
}
