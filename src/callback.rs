//! Callback Registry (C9, `spec.md` §4.9): tracks server-initiated
//! callbacks registered against fields, and dispatches incoming callback
//! messages to the right handler by id.

use crate::value::Value;
use std::sync::Arc;

/// Server-assigned callback id, distinct from RPC message ids but drawn
/// from the same top-bit-set space (`spec.md` §4.5, §4.9).
pub type CallbackId = u32;

/// Bitmask of callback trigger conditions (`spec.md` §4.9 "Callback
/// types").
pub mod callback_type {
    pub const VALUE_CHANGED: u32 = 0x1;
    pub const POLL: u32 = 0x2;
    pub const MOTOR_BACKLASH: u32 = 0x4;
    pub const FUNCTION: u32 = 0x8;
}

/// What kind of server object the callback is attached to
/// (`spec.md` §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    NetworkField,
    FieldLevel,
}

/// A user-supplied handler invoked with the new value on each matching
/// server callback delivery.
pub type CallbackHandler = Arc<dyn Fn(&Value) + Send + Sync>;

pub struct Callback {
    pub id: CallbackId,
    pub kind: CallbackKind,
    pub field_name: String,
    pub mask: u32,
    pub handler: CallbackHandler,
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("field_name", &self.field_name)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Live callback registrations for one [`crate::connection::Server`].
/// Reconnection clears and re-adds every entry under a fresh id
/// (`spec.md` §4.9 "Reconnect re-registration") rather than mutating in
/// place, so callers always see `reassign_id` called exactly once per
/// surviving registration.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Vec<Callback>,
}

impl CallbackRegistry {
    pub fn new() -> CallbackRegistry {
        CallbackRegistry { callbacks: Vec::new() }
    }

    pub fn add(&mut self, callback: Callback) {
        self.callbacks.push(callback);
    }

    pub fn remove(&mut self, id: CallbackId) -> Option<Callback> {
        let index = self.callbacks.iter().position(|c| c.id == id)?;
        Some(self.callbacks.remove(index))
    }

    pub fn dispatch(&self, id: CallbackId, value: &Value) -> bool {
        if let Some(callback) = self.callbacks.iter().find(|c| c.id == id) {
            (callback.handler)(value);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Callback> {
        self.callbacks.iter()
    }

    /// Renumbers an existing callback's id - used after reconnect, when the
    /// server issues fresh ids for every re-registered callback
    /// (`spec.md` §4.9).
    pub fn reassign_id(&mut self, old_id: CallbackId, new_id: CallbackId) {
        if let Some(callback) = self.callbacks.iter_mut().find(|c| c.id == old_id) {
            callback.id = new_id;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_invokes_the_matching_handler() {
        let mut registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.add(Callback {
            id: 5,
            kind: CallbackKind::NetworkField,
            field_name: "theta.position".to_string(),
            mask: callback_type::VALUE_CHANGED,
            handler: Arc::new(move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        });
        let value = Value::scalar(Payload::Double(vec![1.0]));
        assert!(registry.dispatch(5, &value));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!registry.dispatch(6, &value));
    }

    #[test]
    fn reassign_id_renumbers_in_place() {
        let mut registry = CallbackRegistry::new();
        registry.add(Callback {
            id: 1,
            kind: CallbackKind::FieldLevel,
            field_name: "theta.position".to_string(),
            mask: callback_type::POLL,
            handler: Arc::new(|_| {}),
        });
        registry.reassign_id(1, 99);
        let value = Value::scalar(Payload::Double(vec![1.0]));
        assert!(registry.dispatch(99, &value));
    }
}
