#![forbid(unsafe_code)]

//! Resize-class streams: coalesced by dirty flag, not by value equality.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use cadenza_engine::Engine;
use cadenza_events::{
    Callback, Emitter, END, EventHandler, EventSource, EventSourceExt, ListenerId, RESIZE, START,
    SourceId, UPDATE,
};

use crate::gate::PhaseGate;

struct ResizeInner<T> {
    input: EventHandler<T>,
    output: EventHandler<T>,
    latest: Rc<RefCell<Option<T>>>,
}

/// A stream for size-class values, which must fire at most once per frame
/// per phase no matter how many upstream writers triggered them.
///
/// Unlike [`Stream`](crate::Stream), repeated emissions are collapsed by a
/// dirty flag rather than value comparison: the first trigger in a phase
/// window schedules one `"resize"` emission into the queue matching the
/// phase active at that moment, and later triggers only refresh the payload.
/// An environment notifier may therefore fire arbitrarily often per frame.
pub struct ResizeStream<T> {
    inner: Rc<ResizeInner<T>>,
}

impl<T> Clone for ResizeStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> std::fmt::Debug for ResizeStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizeStream")
            .field("id", &self.source_id())
            .field("has_value", &self.inner.latest.borrow().is_some())
            .finish()
    }
}

impl<T: Clone + 'static> ResizeStream<T> {
    /// Create a resize stream fed by subscription
    /// ([`subscribe`](ResizeStream::subscribe)) or direct emission into
    /// upstream sources.
    #[must_use]
    pub fn new(engine: &Engine) -> Self {
        let input: EventHandler<T> = EventHandler::new();
        let output: EventHandler<T> = EventHandler::new();
        let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

        let flush: Rc<dyn Fn()> = {
            let output = output.clone();
            let latest = Rc::clone(&latest);
            Rc::new(move || {
                let value = latest.borrow().clone();
                if let Some(value) = value {
                    output.emit(RESIZE, &value);
                }
            })
        };

        let gate = PhaseGate::new(engine);
        {
            let latest = Rc::clone(&latest);
            input.on(RESIZE, move |payload: &T| {
                *latest.borrow_mut() = Some(payload.clone());
                gate.schedule(Rc::clone(&flush));
            });
        }

        Self {
            inner: Rc::new(ResizeInner {
                input,
                output,
                latest,
            }),
        }
    }

    /// Listen for `"resize"` events from an upstream source.
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

    /// The most recently observed size, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.latest.borrow().clone()
    }

    /// Feed a size directly, as an upstream writer would.
    pub fn trigger(&self, value: &T) {
        self.inner.input.emit(RESIZE, value);
    }

    /// Derive a resize stream from two sources. The combiner runs on every
    /// trigger once both sources have produced a value; emission stays
    /// coalesced to once per phase window.
    ///
    /// The `"resize"` channel always retriggers; the value-carrying
    /// `"start"`/`"update"`/`"end"` channels retrigger only on an actual
    /// change, so an attribute source re-announcing its value does not fan
    /// out another resize.
    pub fn lift2<A, B, SA, SB, F>(engine: &Engine, combine: F, a: &SA, b: &SB) -> Self
    where
        A: Clone + PartialEq + 'static,
        B: Clone + PartialEq + 'static,
        SA: EventSource<A>,
        SB: EventSource<B>,
        F: Fn(&A, &B) -> T + 'static,
    {
        let stream = Self::new(engine);
        let slot_a: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
        let slot_b: Rc<RefCell<Option<B>>> = Rc::new(RefCell::new(None));

        let recompute: Rc<dyn Fn()> = {
            let stream = stream.clone();
            let slot_a = Rc::clone(&slot_a);
            let slot_b = Rc::clone(&slot_b);
            Rc::new(move || {
                let values = {
                    let a = slot_a.borrow();
                    let b = slot_b.borrow();
                    match (a.as_ref(), b.as_ref()) {
                        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                        _ => None,
                    }
                };
                if let Some((a, b)) = values {
                    stream.trigger(&combine(&a, &b));
                }
            })
        };

        watch_resize_source(a, &slot_a, &recompute);
        watch_resize_source(b, &slot_b, &recompute);
        stream
    }
}

/// Wire one lift input: `resize` retriggers unconditionally, the value
/// channels only when the payload changed.
fn watch_resize_source<A, S>(source: &S, slot: &Rc<RefCell<Option<A>>>, recompute: &Rc<dyn Fn()>)
where
    A: Clone + PartialEq + 'static,
    S: EventSource<A>,
{
    for channel in [START, UPDATE, END] {
        let slot = Rc::clone(slot);
        let recompute = Rc::clone(recompute);
        source.add_listener(
            channel,
            Rc::new(move |payload: &A| {
                let changed = {
                    let mut slot = slot.borrow_mut();
                    if slot.as_ref() == Some(payload) {
                        false
                    } else {
                        *slot = Some(payload.clone());
                        true
                    }
                };
                if changed {
                    (*recompute)();
                }
            }),
        );
    }
    {
        let slot = Rc::clone(slot);
        let recompute = Rc::clone(recompute);
        source.add_listener(
            RESIZE,
            Rc::new(move |payload: &A| {
                *slot.borrow_mut() = Some(payload.clone());
                (*recompute)();
            }),
        );
    }
}

impl<T: Clone + PartialEq + 'static> ResizeStream<AHashMap<String, T>> {
    /// Batch several named size sources into one keyed payload, emitting at
    /// most once per phase window.
    pub fn merge<S, K>(engine: &Engine, sources: impl IntoIterator<Item = (K, S)>) -> Self
    where
        S: EventSource<T>,
        K: Into<String>,
    {
        let stream = Self::new(engine);
        let merged: Rc<RefCell<AHashMap<String, T>>> = Rc::new(RefCell::new(AHashMap::new()));

        for (key, source) in sources {
            let key: String = key.into();
            let slot: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
            let recompute: Rc<dyn Fn()> = {
                let merged = Rc::clone(&merged);
                let stream_handle = stream.clone();
                let slot = Rc::clone(&slot);
                Rc::new(move || {
                    let value = slot.borrow().clone();
                    if let Some(value) = value {
                        merged.borrow_mut().insert(key.clone(), value);
                        let snapshot = merged.borrow().clone();
                        stream_handle.trigger(&snapshot);
                    }
                })
            };
            watch_resize_source(&source, &slot, &recompute);
        }
        stream
    }
}

impl<T: Clone + 'static> EventSource<T> for ResizeStream<T> {
    fn source_id(&self) -> SourceId {
        self.inner.output.source_id()
    }

    fn add_listener(&self, channel: &str, callback: Callback<T>) -> ListenerId {
        self.inner.output.add_listener(channel, callback)
    }

    fn remove_listener(&self, channel: &str, id: ListenerId) {
        self.inner.output.remove_listener(channel, id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
