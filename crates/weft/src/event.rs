// Listener plumbing: the engine-wide execution listener set and the
// per-operation named event hooks. Handlers are stored on the engine side
// so operations in the history buffer stay plain data.

use std::collections::HashMap;

use crate::identifier::Identifier;
use crate::wire::EncodedOp;

/// A synchronous handler invoked with the encoded form of the operation
/// that triggered it. Panics are not caught; they unwind to whoever drove
/// the execution.
pub type Listener<T> = Box<dyn FnMut(&EncodedOp<T>)>;

/// Named event hooks keyed by operation identity.
pub(crate) struct EventHooks<T> {
    handlers: HashMap<Identifier, HashMap<String, Vec<Listener<T>>>>,
}

impl<T> EventHooks<T> {
    pub fn new() -> Self {
        EventHooks {
            handlers: HashMap::new(),
        }
    }

    /// Append a handler for `event` on the operation `id`. Handlers fire
    /// in registration order.
    pub fn on(&mut self, id: Identifier, event: &str, handler: Listener<T>) {
        self.handlers
            .entry(id)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Invoke the handlers registered for `event` on `id`. Bubbling along
    /// parent pointers is the engine's job; this fires one level only.
    pub fn fire(&mut self, id: &Identifier, event: &str, payload: &EncodedOp<T>) {
        if let Some(events) = self.handlers.get_mut(id) {
            if let Some(handlers) = events.get_mut(event) {
                for handler in handlers.iter_mut() {
                    handler(payload);
                }
            }
        }
    }
}
