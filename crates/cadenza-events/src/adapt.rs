#![forbid(unsafe_code)]

//! Payload adaptors: map, filter, and split events in flight.
//!
//! Each adaptor owns an input [`EventHandler`] (so upstream wiring behaves
//! exactly like any other subscriber) and a separate output emitter. The
//! bridge between them is installed lazily, per channel, when the first
//! downstream listener registers, the same laziness the relay machinery
//! gives plain handlers.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::emitter::EventEmitter;
use crate::handler::EventHandler;
use crate::{Callback, Emitter, EventSource, EventSourceExt, ListenerId, SourceId};

// ---------------------------------------------------------------------------
// EventMapper
// ---------------------------------------------------------------------------

struct MapperInner<T, U> {
    input: EventHandler<T>,
    output: EventEmitter<U>,
    map: Rc<dyn Fn(&T) -> U>,
    tapped: RefCell<Vec<String>>,
}

/// Transforms the payload of every forwarded event; the channel is unchanged.
pub struct EventMapper<T, U> {
    inner: Rc<MapperInner<T, U>>,
}

impl<T, U> Clone for EventMapper<T, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static, U: 'static> EventMapper<T, U> {
    /// Create a mapper applying `map` to every payload it forwards.
    #[must_use]
    pub fn new(map: impl Fn(&T) -> U + 'static) -> Self {
        Self {
            inner: Rc::new(MapperInner {
                input: EventHandler::new(),
                output: EventEmitter::new(),
                map: Rc::new(map),
                tapped: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Listen for events from an upstream source.
    pub fn subscribe<S>(&self, source: &S)
    where
        S: EventSource<T> + Clone + 'static,
    {
        self.inner.input.subscribe(source);
    }

    /// Stop listening to one upstream source.
    pub fn unsubscribe<S: EventSource<T>>(&self, source: &S) {
        self.inner.input.unsubscribe(source);
    }

    /// Install the input→output bridge for `channel` once.
    fn ensure_tap(&self, channel: &str) {
        if self
            .inner
            .tapped
            .borrow()
            .iter()
            .any(|existing| existing == channel)
        {
            return;
        }
        self.inner.tapped.borrow_mut().push(channel.to_string());

        let weak: Weak<MapperInner<T, U>> = Rc::downgrade(&self.inner);
        let tap_channel = channel.to_string();
        self.inner.input.on(channel, move |payload: &T| {
            if let Some(inner) = weak.upgrade() {
                let mapped = (*inner.map)(payload);
                inner.output.emit(&tap_channel, &mapped);
            }
        });
    }
}

impl<T: 'static, U: 'static> EventSource<U> for EventMapper<T, U> {
    fn source_id(&self) -> SourceId {
        self.inner.output.source_id()
    }

    fn add_listener(&self, channel: &str, callback: Callback<U>) -> ListenerId {
        self.ensure_tap(channel);
        self.inner.output.add_listener(channel, callback)
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.inner.output.remove_listener(channel, id);
    }
}

// ---------------------------------------------------------------------------
// EventFilter
// ---------------------------------------------------------------------------

struct FilterInner<T> {
    input: EventHandler<T>,
    output: EventEmitter<T>,
    predicate: Rc<dyn Fn(&T) -> bool>,
    tapped: RefCell<Vec<String>>,
}

/// Forwards only the events whose payload satisfies a predicate.
pub struct EventFilter<T> {
    inner: Rc<FilterInner<T>>,
}

impl<T> Clone for EventFilter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> EventFilter<T> {
    /// Create a filter forwarding events for which `predicate` is true.
    #[must_use]
    pub fn new(predicate: impl Fn(&T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(FilterInner {
                input: EventHandler::new(),
                output: EventEmitter::new(),
                predicate: Rc::new(predicate),
                tapped: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Listen for events from an upstream source.
    pub fn subscribe<S>(&self, source: &S)
    where
        S: EventSource<T> + Clone + 'static,
    {
        self.inner.input.subscribe(source);
    }

    /// Stop listening to one upstream source.
    pub fn unsubscribe<S: EventSource<T>>(&self, source: &S) {
        self.inner.input.unsubscribe(source);
    }

    fn ensure_tap(&self, channel: &str) {
        if self
            .inner
            .tapped
            .borrow()
            .iter()
            .any(|existing| existing == channel)
        {
            return;
        }
        self.inner.tapped.borrow_mut().push(channel.to_string());

        let weak: Weak<FilterInner<T>> = Rc::downgrade(&self.inner);
        let tap_channel = channel.to_string();
        self.inner.input.on(channel, move |payload: &T| {
            if let Some(inner) = weak.upgrade() {
                if (*inner.predicate)(payload) {
                    inner.output.emit(&tap_channel, payload);
                }
            }
        });
    }
}

impl<T: 'static> EventSource<T> for EventFilter<T> {
    fn source_id(&self) -> SourceId {
        self.inner.output.source_id()
    }

    fn add_listener(&self, channel: &str, callback: Callback<T>) -> ListenerId {
        self.ensure_tap(channel);
        self.inner.output.add_listener(channel, callback)
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.inner.output.remove_listener(channel, id);
    }
}

// ---------------------------------------------------------------------------
// EventSplitter
// ---------------------------------------------------------------------------

struct SplitterInner<T> {
    input: EventHandler<T>,
    split: Rc<dyn Fn(&T) -> Option<EventEmitter<T>>>,
    tapped: RefCell<Vec<String>>,
}

/// Routes each event to a destination emitter chosen per payload.
///
/// Destinations are not subscribers, so routed channels cannot be discovered
/// from downstream listeners; declare them with [`tap`](EventSplitter::tap).
pub struct EventSplitter<T> {
    inner: Rc<SplitterInner<T>>,
}

impl<T> Clone for EventSplitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> EventSplitter<T> {
    /// Create a splitter. `split` picks the destination for each payload;
    /// `None` drops the event.
    #[must_use]
    pub fn new(split: impl Fn(&T) -> Option<EventEmitter<T>> + 'static) -> Self {
        Self {
            inner: Rc::new(SplitterInner {
                input: EventHandler::new(),
                split: Rc::new(split),
                tapped: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Listen for events from an upstream source.
    pub fn subscribe<S>(&self, source: &S)
    where
        S: EventSource<T> + Clone + 'static,
    {
        self.inner.input.subscribe(source);
    }

    /// Stop listening to one upstream source.
    pub fn unsubscribe<S: EventSource<T>>(&self, source: &S) {
        self.inner.input.unsubscribe(source);
    }

    /// Declare `channel` as routed. Events on undeclared channels are not
    /// observed at all.
    pub fn tap(&self, channel: &str) {
        if self
            .inner
            .tapped
            .borrow()
            .iter()
            .any(|existing| existing == channel)
        {
            return;
        }
        self.inner.tapped.borrow_mut().push(channel.to_string());

        let weak: Weak<SplitterInner<T>> = Rc::downgrade(&self.inner);
        let tap_channel = channel.to_string();
        self.inner.input.on(channel, move |payload: &T| {
            if let Some(inner) = weak.upgrade() {
                if let Some(target) = (*inner.split)(payload) {
                    target.emit(&tap_channel, payload);
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
