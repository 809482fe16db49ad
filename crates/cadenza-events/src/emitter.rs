#![forbid(unsafe_code)]

//! The named-channel publish primitive.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;

use crate::{Callback, Emitter, EventSource, ListenerId, SourceId, next_source_id};

struct EmitterInner<T> {
    id: SourceId,
    next_listener: Cell<u64>,
    /// Per-channel listener lists in registration order.
    channels: RefCell<AHashMap<String, Vec<(ListenerId, Callback<T>)>>>,
}

/// A named-channel event publisher.
///
/// Channels are independent string keys; a node may have any number of
/// simultaneously active channels. Cloning an `EventEmitter` produces a new
/// handle to the **same** listener table.
///
/// # Invariants
///
/// 1. Listeners fire in registration order.
/// 2. [`emit`](Emitter::emit) iterates a snapshot of the listener list taken
///    at emission start: mutation during emission neither skips nor
///    double-invokes an in-flight registration, and listeners added during
///    emission first fire on the next emission.
/// 3. Emitting on a channel with zero listeners is a no-op.
pub struct EventEmitter<T> {
    inner: Rc<EmitterInner<T>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("id", &self.inner.id)
            .field("channels", &self.inner.channels.borrow().len())
            .finish()
    }
}

impl<T> EventEmitter<T> {
    /// Create an emitter with no channels and no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                id: next_source_id(),
                next_listener: Cell::new(1),
                channels: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Number of listeners currently registered on `channel`.
    #[must_use]
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .borrow()
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Whether `channel` has at least one listener.
    #[must_use]
    pub fn has_listeners(&self, channel: &str) -> bool {
        self.listener_count(channel) > 0
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Emitter<T> for EventEmitter<T> {
    fn emit(&self, channel: &str, payload: &T) {
        // Snapshot, then release the borrow before invoking: listeners may
        // register or remove listeners on this same emitter.
        let snapshot: Vec<Callback<T>> = {
            let channels = self.inner.channels.borrow();
            match channels.get(channel) {
                Some(list) if !list.is_empty() => {
                    list.iter().map(|(_, cb)| Rc::clone(cb)).collect()
                }
                _ => return,
            }
        };
        for callback in snapshot {
            (*callback)(payload);
        }
    }
}

impl<T> EventSource<T> for EventEmitter<T> {
    fn source_id(&self) -> SourceId {
        self.inner.id
    }

    fn add_listener(&self, channel: &str, callback: Callback<T>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(self.inner.next_listener.get() + 1);
        self.inner
            .channels
            .borrow_mut()
            .entry(channel.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        if let Some(list) = self.inner.channels.borrow_mut().get_mut(channel) {
            list.retain(|(lid, _)| *lid != id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
