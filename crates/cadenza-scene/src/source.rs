#![forbid(unsafe_code)]

//! Pushable attribute sources feeding the composition tree.

use std::cell::RefCell;
use std::rc::Rc;

use cadenza_engine::Engine;
use cadenza_events::{Callback, Emitter, END, EventHandler, EventSource, ListenerId, START, SourceId};

struct SourceInner<T> {
    engine: Engine,
    output: EventHandler<T>,
    current: RefCell<Option<T>>,
}

/// A hand-driven source of partial attributes.
///
/// [`set`](SpecSource::set) announces the new value bracketed across the
/// frame: `"start"` in the next pre-tick (so the frame is computed against
/// it) and `"end"` in the dirty phase (after every consumer has seen the
/// frame). Animated attributes come from a transitionable through a mapper
/// instead; this type is for direct assignment.
pub struct SpecSource<T> {
    inner: Rc<SourceInner<T>>,
}

impl<T> Clone for SpecSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> SpecSource<T> {
    /// Create an empty source; nothing is emitted until the first `set`.
    #[must_use]
    pub fn new(engine: &Engine) -> Self {
        Self {
            inner: Rc::new(SourceInner {
                engine: engine.clone(),
                output: EventHandler::new(),
                current: RefCell::new(None),
            }),
        }
    }

    /// Create a source holding `value`, announced on the next step.
    #[must_use]
    pub fn with_value(engine: &Engine, value: T) -> Self {
        let source = Self::new(engine);
        source.set(value);
        source
    }

    /// Assign a new value, to be announced on the next step.
    pub fn set(&self, value: T) {
        *self.inner.current.borrow_mut() = Some(value.clone());

        let output = self.inner.output.clone();
        let engine = self.inner.engine.clone();
        let end_value = value.clone();
        self.inner.engine.push_pre_tick(move || {
            output.emit(START, &value);
            let output = output.clone();
            engine.push_dirty(move || output.emit(END, &end_value));
        });
    }

    /// The most recently assigned value.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.current.borrow().clone()
    }
}

impl<T: Clone + 'static> EventSource<T> for SpecSource<T> {
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
