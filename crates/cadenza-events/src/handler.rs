#![forbid(unsafe_code)]

//! Upstream relay subscription on top of [`EventEmitter`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::emitter::EventEmitter;
use crate::{Callback, Emitter, EventSource, ListenerId, SourceId};

/// One standing subscription to an upstream source: the source handle plus
/// the listener tokens for every relay attached to it so far.
struct UpstreamLink<T> {
    source: Rc<dyn EventSource<T>>,
    attached: Vec<(String, ListenerId)>,
}

struct HandlerInner<T> {
    output: EventEmitter<T>,
    /// Subscribed sources, in subscription order.
    upstream: RefCell<Vec<UpstreamLink<T>>>,
    /// Memoized per-channel relay closures, in creation order.
    relays: RefCell<Vec<(String, Callback<T>)>>,
}

/// An [`EventEmitter`] that can also *forward* events from upstream sources.
///
/// `subscribe(source)` establishes a standing relay: for every channel that
/// already has a local listener, the handler attaches its memoized relay
/// closure to the source's matching channel, so future events on the source
/// flow through this handler's own emitter. Registering a first listener for
/// a *new* channel retroactively attaches that channel's relay to every
/// already-subscribed source: no events are missed going forward, and no
/// history is replayed.
///
/// # Invariants
///
/// 1. The relay closure for a channel is created at most once per handler.
/// 2. Subscribing the same source twice is a no-op; unsubscribing a source
///    that was never subscribed is a no-op.
/// 3. Relay attachment and detachment iterate sources in subscription order
///    and channels in relay-creation order.
///
/// # Failure Modes
///
/// - A handler subscribed to itself relays its own emissions back into its
///   emitter and recurses; the dependency graph must be acyclic
///   (construction-time precondition, not checked at runtime).
pub struct EventHandler<T> {
    inner: Rc<HandlerInner<T>>,
}

impl<T> Clone for EventHandler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> std::fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.source_id())
            .field("upstream", &self.inner.upstream.borrow().len())
            .field("relays", &self.inner.relays.borrow().len())
            .finish()
    }
}

impl<T: 'static> EventHandler<T> {
    /// Create a handler with no listeners and no upstream sources.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HandlerInner {
                output: EventEmitter::new(),
                upstream: RefCell::new(Vec::new()),
                relays: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Listen for events from an upstream source.
    ///
    /// Idempotent: subscribing a source this handler already listens to does
    /// nothing.
    pub fn subscribe<S>(&self, source: &S)
    where
        S: EventSource<T> + Clone + 'static,
    {
        let id = source.source_id();
        if self
            .inner
            .upstream
            .borrow()
            .iter()
            .any(|link| link.source.source_id() == id)
        {
            return;
        }

        let source: Rc<dyn EventSource<T>> = Rc::new(source.clone());

        // Attach every existing relay before recording the link, without
        // holding any borrow across the foreign add_listener calls.
        let relays: Vec<(String, Callback<T>)> = self
            .inner
            .relays
            .borrow()
            .iter()
            .map(|(channel, relay)| (channel.clone(), Rc::clone(relay)))
            .collect();
        let mut attached = Vec::with_capacity(relays.len());
        for (channel, relay) in relays {
            let listener = source.add_listener(&channel, relay);
            attached.push((channel, listener));
        }

        self.inner
            .upstream
            .borrow_mut()
            .push(UpstreamLink { source, attached });
    }

    /// Stop listening to one upstream source. Unknown sources are ignored.
    pub fn unsubscribe<S: EventSource<T>>(&self, source: &S) {
        self.detach(source.source_id());
    }

    /// Stop listening to every upstream source.
    pub fn unsubscribe_all(&self) {
        let links: Vec<UpstreamLink<T>> = self.inner.upstream.borrow_mut().drain(..).collect();
        for link in links {
            for (channel, listener) in &link.attached {
                link.source.remove_listener(channel, *listener);
            }
        }
    }

    /// Number of upstream sources currently subscribed.
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.inner.upstream.borrow().len()
    }

    /// Whether `channel` has at least one local listener.
    #[must_use]
    pub fn has_listeners(&self, channel: &str) -> bool {
        self.inner.output.has_listeners(channel)
    }

    fn detach(&self, id: SourceId) {
        let link = {
            let mut upstream = self.inner.upstream.borrow_mut();
            upstream
                .iter()
                .position(|link| link.source.source_id() == id)
                .map(|index| upstream.remove(index))
        };
        if let Some(link) = link {
            for (channel, listener) in &link.attached {
                link.source.remove_listener(channel, *listener);
            }
        }
    }

    /// Create the relay for `channel` if it does not exist yet and attach it
    /// to every currently subscribed source.
    fn ensure_relay(&self, channel: &str) {
        if self
            .inner
            .relays
            .borrow()
            .iter()
            .any(|(existing, _)| existing == channel)
        {
            return;
        }

        let weak: Weak<HandlerInner<T>> = Rc::downgrade(&self.inner);
        let relay_channel = channel.to_string();
        let relay: Callback<T> = Rc::new(move |payload: &T| {
            if let Some(inner) = weak.upgrade() {
                inner.output.emit(&relay_channel, payload);
            }
        });

        self.inner
            .relays
            .borrow_mut()
            .push((channel.to_string(), Rc::clone(&relay)));

        // Retroactive attachment: sources subscribed before this channel had
        // any listener now get the relay too.
        let sources: Vec<Rc<dyn EventSource<T>>> = self
            .inner
            .upstream
            .borrow()
            .iter()
            .map(|link| Rc::clone(&link.source))
            .collect();
        for source in sources {
            let listener = source.add_listener(channel, Rc::clone(&relay));
            let mut upstream = self.inner.upstream.borrow_mut();
            if let Some(link) = upstream
                .iter_mut()
                .find(|link| link.source.source_id() == source.source_id())
            {
                link.attached.push((channel.to_string(), listener));
            }
        }
    }
}

impl<T: 'static> Default for EventHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Emitter<T> for EventHandler<T> {
    fn emit(&self, channel: &str, payload: &T) {
        self.inner.output.emit(channel, payload);
    }
}

impl<T: 'static> EventSource<T> for EventHandler<T> {
    fn source_id(&self) -> SourceId {
        self.inner.output.source_id()
    }

    fn add_listener(&self, channel: &str, callback: Callback<T>) -> ListenerId {
        self.ensure_relay(channel);
        self.inner.output.add_listener(channel, callback)
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.inner.output.remove_listener(channel, id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
