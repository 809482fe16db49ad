#![forbid(unsafe_code)]

//! Once-per-phase-window flush scheduling shared by the stream kinds.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cadenza_engine::Engine;
use cadenza_events::{END, EventSource, RESIZE, START, UPDATE};

/// Every channel that carries a value for a dataflow input. Attribute and
/// animation sources speak `start`/`update`/`end`; size sources speak
/// `resize`.
pub(crate) const VALUE_CHANNELS: [&str; 4] = [START, UPDATE, END, RESIZE];

/// Schedules a flush at most once per phase window.
///
/// The first [`schedule`](PhaseGate::schedule) inside a window queues the
/// flush into the engine queue matching the current phase; further calls
/// before the flush runs are absorbed. The flag clears right before the
/// flush executes, so emissions produced *by* the flush can schedule a new
/// one.
#[derive(Clone)]
pub(crate) struct PhaseGate {
    engine: Engine,
    scheduled: Rc<Cell<bool>>,
}

impl PhaseGate {
    pub(crate) fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
            scheduled: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn schedule(&self, flush: Rc<dyn Fn()>) {
        if self.scheduled.replace(true) {
            return;
        }
        let scheduled = Rc::clone(&self.scheduled);
        self.engine.defer_current(move || {
            scheduled.set(false);
            (*flush)();
        });
    }
}

/// Register `observer` for every value-carrying channel of `source`.
pub(crate) fn watch_values<A, S>(source: &S, observer: Rc<dyn Fn(&A)>)
where
    S: EventSource<A>,
{
    for channel in VALUE_CHANNELS {
        source.add_listener(channel, Rc::clone(&observer));
    }
}

/// Build the standard input observer: record the latest payload in `slot`,
/// then arm the gate.
pub(crate) fn slot_observer<A: Clone + 'static>(
    slot: &Rc<RefCell<Option<A>>>,
    gate: &PhaseGate,
    flush: &Rc<dyn Fn()>,
) -> Rc<dyn Fn(&A)> {
    let slot = Rc::clone(slot);
    let gate = gate.clone();
    let flush = Rc::clone(flush);
    Rc::new(move |payload: &A| {
        *slot.borrow_mut() = Some(payload.clone());
        gate.schedule(Rc::clone(&flush));
    })
}
