#![forbid(unsafe_code)]

//! Value streams: `lift` combinators and keyed `merge`.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use cadenza_engine::Engine;
use cadenza_events::{
    Callback, Emitter, EventHandler, EventSource, ListenerId, SourceId, UPDATE,
};

use crate::gate::{PhaseGate, slot_observer, watch_values};

struct StreamInner<T> {
    output: EventHandler<T>,
    last: RefCell<Option<T>>,
}

/// A derived dataflow value.
///
/// Emits its recomputed value on the `"update"` channel, suppressing
/// emissions whose payload equals the most recently emitted one. Created
/// once at graph-construction time via the `lift*`/`merge` constructors;
/// the sources keep the internal wiring alive for as long as they live.
pub struct Stream<T> {
    inner: Rc<StreamInner<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.source_id())
            .field("has_value", &self.inner.last.borrow().is_some())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Stream<T> {
    fn idle() -> Self {
        Self {
            inner: Rc::new(StreamInner {
                output: EventHandler::new(),
                last: RefCell::new(None),
            }),
        }
    }

    /// The most recently emitted value, if any source round has completed.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.last.borrow().clone()
    }

    /// Emit `value` unless it equals the previous emission.
    fn push(&self, value: T) {
        if self.inner.last.borrow().as_ref() == Some(&value) {
            tracing::trace!("unchanged stream value suppressed");
            return;
        }
        *self.inner.last.borrow_mut() = Some(value.clone());
        self.inner.output.emit(UPDATE, &value);
    }

    /// Derive a stream from a single source.
    pub fn lift<A, SA, F>(engine: &Engine, combine: F, source: &SA) -> Self
    where
        A: Clone + 'static,
        SA: EventSource<A>,
        F: Fn(&A) -> T + 'static,
    {
        let stream = Self::idle();
        let slot: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));

        let flush: Rc<dyn Fn()> = {
            let stream = stream.clone();
            let slot = Rc::clone(&slot);
            Rc::new(move || {
                let value = slot.borrow().clone();
                if let Some(value) = value {
                    stream.push(combine(&value));
                }
            })
        };

        let gate = PhaseGate::new(engine);
        watch_values(source, slot_observer(&slot, &gate, &flush));
        stream
    }

    /// Derive a stream from two sources. The combiner runs only once both
    /// sources have produced a value.
    pub fn lift2<A, B, SA, SB, F>(engine: &Engine, combine: F, a: &SA, b: &SB) -> Self
    where
        A: Clone + 'static,
        B: Clone + 'static,
        SA: EventSource<A>,
        SB: EventSource<B>,
        F: Fn(&A, &B) -> T + 'static,
    {
        let stream = Self::idle();
        let slot_a: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
        let slot_b: Rc<RefCell<Option<B>>> = Rc::new(RefCell::new(None));

        let flush: Rc<dyn Fn()> = {
            let stream = stream.clone();
            let slot_a = Rc::clone(&slot_a);
            let slot_b = Rc::clone(&slot_b);
            Rc::new(move || {
                // Clone out and release the borrows before running user code.
                let values = {
                    let a = slot_a.borrow();
                    let b = slot_b.borrow();
                    match (a.as_ref(), b.as_ref()) {
                        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
                        _ => None,
                    }
                };
                if let Some((a, b)) = values {
                    stream.push(combine(&a, &b));
                }
            })
        };

        let gate = PhaseGate::new(engine);
        watch_values(a, slot_observer(&slot_a, &gate, &flush));
        watch_values(b, slot_observer(&slot_b, &gate, &flush));
        stream
    }

    /// Derive a stream from three sources. The combiner runs only once every
    /// source has produced a value.
    pub fn lift3<A, B, C, SA, SB, SC, F>(
        engine: &Engine,
        combine: F,
        a: &SA,
        b: &SB,
        c: &SC,
    ) -> Self
    where
        A: Clone + 'static,
        B: Clone + 'static,
        C: Clone + 'static,
        SA: EventSource<A>,
        SB: EventSource<B>,
        SC: EventSource<C>,
        F: Fn(&A, &B, &C) -> T + 'static,
    {
        let stream = Self::idle();
        let slot_a: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
        let slot_b: Rc<RefCell<Option<B>>> = Rc::new(RefCell::new(None));
        let slot_c: Rc<RefCell<Option<C>>> = Rc::new(RefCell::new(None));

        let flush: Rc<dyn Fn()> = {
            let stream = stream.clone();
            let slot_a = Rc::clone(&slot_a);
            let slot_b = Rc::clone(&slot_b);
            let slot_c = Rc::clone(&slot_c);
            Rc::new(move || {
                let values = {
                    let a = slot_a.borrow();
                    let b = slot_b.borrow();
                    let c = slot_c.borrow();
                    match (a.as_ref(), b.as_ref(), c.as_ref()) {
                        (Some(a), Some(b), Some(c)) => Some((a.clone(), b.clone(), c.clone())),
                        _ => None,
                    }
                };
                if let Some((a, b, c)) = values {
                    stream.push(combine(&a, &b, &c));
                }
            })
        };

        let gate = PhaseGate::new(engine);
        watch_values(a, slot_observer(&slot_a, &gate, &flush));
        watch_values(b, slot_observer(&slot_b, &gate, &flush));
        watch_values(c, slot_observer(&slot_c, &gate, &flush));
        stream
    }
}

impl<A: Clone + PartialEq + 'static> Stream<AHashMap<String, A>> {
    /// Batch several named like-typed sources into one keyed payload,
    /// re-emitting once per logical update rather than once per source.
    ///
    /// Keys absent from the payload belong to sources that have not produced
    /// a value yet.
    pub fn merge<S, K>(engine: &Engine, sources: impl IntoIterator<Item = (K, S)>) -> Self
    where
        S: EventSource<A>,
        K: Into<String>,
    {
        let stream = Self::idle();
        let merged: Rc<RefCell<AHashMap<String, A>>> = Rc::new(RefCell::new(AHashMap::new()));

        let flush: Rc<dyn Fn()> = {
            let stream = stream.clone();
            let merged = Rc::clone(&merged);
            Rc::new(move || {
                let snapshot = merged.borrow().clone();
                stream.push(snapshot);
            })
        };

        let gate = PhaseGate::new(engine);
        for (key, source) in sources {
            let key: String = key.into();
            let merged = Rc::clone(&merged);
            let gate = gate.clone();
            let flush = Rc::clone(&flush);
            let observer: Rc<dyn Fn(&A)> = Rc::new(move |payload: &A| {
                merged.borrow_mut().insert(key.clone(), payload.clone());
                gate.schedule(Rc::clone(&flush));
            });
            watch_values(&source, observer);
        }
        stream
    }
}

impl<T: Clone + PartialEq + 'static> EventSource<T> for Stream<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_events::{END, EventSourceExt, START};
    use std::cell::Cell;

    fn engine() -> Engine {
        Engine::new()
    }

    #[test]
    fn lift_combines_once_all_sources_have_values() {
        let engine = engine();
        let a: EventHandler<f64> = EventHandler::new();
        let b: EventHandler<f64> = EventHandler::new();
        let sum = Stream::lift2(&engine, |x: &f64, y: &f64| x + y, &a, &b);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        sum.on(UPDATE, move |v: &f64| sink.borrow_mut().push(*v));

        a.emit(UPDATE, &1.0);
        engine.step_nominal();
        assert!(seen.borrow().is_empty(), "combiner waits for both sources");
        assert_eq!(sum.value(), None);

        b.emit(UPDATE, &2.0);
        engine.step_nominal();
        assert_eq!(*seen.borrow(), vec![3.0]);
        assert_eq!(sum.value(), Some(3.0));
    }

    #[test]
    fn equal_recomputation_is_suppressed() {
        let engine = engine();
        let source: EventHandler<i32> = EventHandler::new();
        let doubled = Stream::lift(&engine, |v: &i32| v * 2, &source);

        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        doubled.on(UPDATE, move |_: &i32| sink.set(sink.get() + 1));

        source.emit(UPDATE, &5);
        engine.step_nominal();
        source.emit(UPDATE, &5);
        engine.step_nominal();
        assert_eq!(count.get(), 1, "same input twice yields one emission");

        source.emit(UPDATE, &6);
        engine.step_nominal();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn simultaneous_arrivals_coalesce_into_one_emission() {
        let engine = engine();
        let a: EventHandler<i32> = EventHandler::new();
        let b: EventHandler<i32> = EventHandler::new();
        let sum = Stream::lift2(&engine, |x: &i32, y: &i32| x + y, &a, &b);

        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        sum.on(UPDATE, move |_: &i32| sink.set(sink.get() + 1));

        // Both sources fire before the step: one flush, one emission.
        a.emit(UPDATE, &1);
        b.emit(UPDATE, &2);
        engine.step_nominal();
        assert_eq!(count.get(), 1);
        assert_eq!(sum.value(), Some(3));
    }

    #[test]
    fn start_and_end_channels_carry_values_too() {
        let engine = engine();
        let source: EventHandler<i32> = EventHandler::new();
        let lifted = Stream::lift(&engine, |v: &i32| *v, &source);

        source.emit(START, &1);
        engine.step_nominal();
        assert_eq!(lifted.value(), Some(1));

        source.emit(END, &2);
        engine.step_nominal();
        assert_eq!(lifted.value(), Some(2));
    }

    #[test]
    fn cascade_converges_within_one_step() {
        let engine = engine();
        let source: EventHandler<i32> = EventHandler::new();
        let first = Stream::lift(&engine, |v: &i32| v + 1, &source);
        let second = Stream::lift(&engine, |v: &i32| v * 10, &first);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        second.on(UPDATE, move |v: &i32| sink.borrow_mut().push(*v));

        source.emit(UPDATE, &4);
        engine.step_nominal();
        assert_eq!(*seen.borrow(), vec![50], "two-deep cascade in one step");
    }

    #[test]
    fn lift3_combines_three_sources() {
        let engine = engine();
        let a: EventHandler<i32> = EventHandler::new();
        let b: EventHandler<i32> = EventHandler::new();
        let c: EventHandler<i32> = EventHandler::new();
        let combined = Stream::lift3(&engine, |x: &i32, y: &i32, z: &i32| x + y + z, &a, &b, &c);

        a.emit(UPDATE, &1);
        b.emit(UPDATE, &2);
        engine.step_nominal();
        assert_eq!(combined.value(), None);

        c.emit(UPDATE, &3);
        engine.step_nominal();
        assert_eq!(combined.value(), Some(6));
    }

    #[test]
    fn merge_batches_named_sources() {
        let engine = engine();
        let x: EventHandler<i32> = EventHandler::new();
        let y: EventHandler<i32> = EventHandler::new();
        let merged = Stream::merge(&engine, [("x", x.clone()), ("y", y.clone())]);

        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        merged.on(UPDATE, move |_: &AHashMap<String, i32>| {
            sink.set(sink.get() + 1);
        });

        x.emit(UPDATE, &10);
        y.emit(UPDATE, &20);
        engine.step_nominal();

        assert_eq!(count.get(), 1, "one keyed emission for two arrivals");
        let value = merged.value().unwrap();
        assert_eq!(value.get("x"), Some(&10));
        assert_eq!(value.get("y"), Some(&20));
    }

    #[test]
    fn downstream_handler_can_subscribe_to_stream() {
        let engine = engine();
        let source: EventHandler<i32> = EventHandler::new();
        let lifted = Stream::lift(&engine, |v: &i32| v + 1, &source);

        let downstream: EventHandler<i32> = EventHandler::new();
        downstream.subscribe(&lifted);
        let seen = Rc::new(Cell::new(0i32));
        let sink = Rc::clone(&seen);
        downstream.on(UPDATE, move |v| sink.set(*v));

        source.emit(UPDATE, &7);
        engine.step_nominal();
        assert_eq!(seen.get(), 8);
    }
}
