#![forbid(unsafe_code)]

//! The animated state holder.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use cadenza_engine::{Engine, TickHandle};
use cadenza_events::{
    Callback, Emitter, END, EventHandler, EventSource, ListenerId, SourceId, START, UPDATE,
};
use web_time::Duration;

use crate::curve::{Curve, Kinematics, Solver, Transition};
use crate::error::Result;
use crate::value::Animatable;

type Completion = Box<dyn FnOnce()>;

struct ActiveMotion {
    solver: Solver,
    elapsed: f64,
    callback: Option<Completion>,
}

struct MotionState {
    kinematics: Kinematics,
    active: Option<ActiveMotion>,
}

struct TransitionableInner<V> {
    engine: Engine,
    output: EventHandler<V>,
    state: RefCell<MotionState>,
    tick: Cell<Option<TickHandle>>,
}

/// A time-based value holder that animates toward targets.
///
/// Idle until [`set`](Transitionable::set) installs a curve; then advanced
/// once per engine step, emitting `"update"` with the evolving value, and
/// `"end"` (plus the completion callback) once the curve converges. `halt`
/// freezes the value mid-flight, preserving the instantaneous velocity for
/// hand-off to the next curve.
///
/// # Invariants
///
/// 1. At most one curve is active at a time; `set` while active replaces the
///    curve, seeding it with the current position and velocity.
/// 2. `halt` never emits `"end"` and never runs the completion callback.
/// 3. While idle the value is static: no tick registration, no emissions.
pub struct Transitionable<V: Animatable> {
    inner: Rc<TransitionableInner<V>>,
}

impl<V: Animatable> Clone for Transitionable<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V: Animatable> std::fmt::Debug for Transitionable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Transitionable")
            .field("position", &state.kinematics.position)
            .field("velocity", &state.kinematics.velocity)
            .field("active", &state.active.is_some())
            .finish()
    }
}

impl<V: Animatable> Transitionable<V> {
    /// Create an idle transitionable holding `initial`.
    #[must_use]
    pub fn new(engine: &Engine, initial: V) -> Self {
        Self {
            inner: Rc::new(TransitionableInner {
                engine: engine.clone(),
                output: EventHandler::new(),
                state: RefCell::new(MotionState {
                    kinematics: Kinematics::at_rest(initial.components()),
                    active: None,
                }),
                tick: Cell::new(None),
            }),
        }
    }

    /// The current value.
    #[must_use]
    pub fn value(&self) -> V {
        V::from_components(&self.inner.state.borrow().kinematics.position)
    }

    /// The current velocity, per component.
    #[must_use]
    pub fn velocity(&self) -> V {
        V::from_components(&self.inner.state.borrow().kinematics.velocity)
    }

    /// Whether a curve is currently driving the value.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.state.borrow().active.is_some()
    }

    /// Animate toward `target` under the given transition.
    ///
    /// If a curve is already active, the current position and instantaneous
    /// velocity become the new curve's starting conditions. Fails fast on an
    /// invalid configuration, leaving the value static.
    pub fn set(&self, target: V, transition: impl Into<Transition>) -> Result<()> {
        self.install(target, transition.into(), None)
    }

    /// Like [`set`](Transitionable::set), invoking `callback` once when the
    /// curve completes naturally. The callback is discarded by `halt`,
    /// `reset`, and curve replacement.
    pub fn set_with(
        &self,
        target: V,
        transition: impl Into<Transition>,
        callback: impl FnOnce() + 'static,
    ) -> Result<()> {
        self.install(target, transition.into(), Some(Box::new(callback)))
    }

    /// Freeze at the current value, keep the instantaneous velocity, and
    /// discard the active curve and its callback. No `"end"` is emitted.
    pub fn halt(&self) {
        let was_active = self.inner.state.borrow_mut().active.take().is_some();
        if was_active {
            self.clear_tick();
            tracing::debug!("transition halted");
        }
    }

    /// Force idle at `value` with zero velocity, discarding any curve.
    pub fn reset(&self, value: V) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.kinematics = Kinematics::at_rest(value.components());
            state.active = None;
        }
        self.clear_tick();
    }

    fn install(&self, target: V, transition: Transition, callback: Option<Completion>) -> Result<()> {
        transition.validate(V::DIM)?;
        let target_vec = target.components();

        let (starting, instant_callback) = {
            let mut state = self.inner.state.borrow_mut();
            // Implicit halt: the active curve (and its callback) is dropped,
            // but its latest kinematics seed the replacement.
            state.active = None;
            let position = state.kinematics.position.clone();
            let velocity = transition
                .velocity
                .clone()
                .unwrap_or_else(|| state.kinematics.velocity.clone());

            if matches!(transition.curve, Curve::Instant) {
                state.kinematics = Kinematics::at_rest(target_vec.clone());
                (position, Some(callback))
            } else {
                let solver =
                    Solver::build(transition.curve, position.clone(), velocity, target_vec);
                state.active = Some(ActiveMotion {
                    solver,
                    elapsed: 0.0,
                    callback,
                });
                (position, None)
            }
        };

        let start_value = V::from_components(&starting);
        self.inner.output.emit(START, &start_value);

        match instant_callback {
            None => {
                self.ensure_tick();
                tracing::debug!(curve = ?transition.curve, "transition installed");
            }
            Some(callback) => {
                // Instant: announce the jump and complete synchronously.
                self.clear_tick();
                self.inner.output.emit(UPDATE, &target);
                self.inner.output.emit(END, &target);
                if let Some(callback) = callback {
                    callback();
                }
            }
        }
        Ok(())
    }

    /// Advance the active curve by one frame delta.
    fn advance(&self, dt: Duration) {
        let step = {
            let mut state = self.inner.state.borrow_mut();
            let Some(active) = state.active.as_mut() else {
                return;
            };
            active.elapsed += dt.as_secs_f64();
            let (position, velocity, done) = active.solver.sample(active.elapsed);
            state.kinematics.position.clone_from(&position);
            state.kinematics.velocity = velocity;
            let callback = if done {
                state.active.take().and_then(|motion| motion.callback)
            } else {
                None
            };
            (V::from_components(&position), done, callback)
        };

        let (value, done, callback) = step;
        if done {
            self.clear_tick();
            self.inner.output.emit(UPDATE, &value);
            self.inner.output.emit(END, &value);
            tracing::debug!("transition complete");
            if let Some(callback) = callback {
                callback();
            }
        } else {
            self.inner.output.emit(UPDATE, &value);
        }
    }

    fn ensure_tick(&self) {
        if self.inner.tick.get().is_some() {
            return;
        }
        let weak: Weak<TransitionableInner<V>> = Rc::downgrade(&self.inner);
        let handle = self.inner.engine.add_tick(move |dt| {
            if let Some(inner) = weak.upgrade() {
                Transitionable { inner }.advance(dt);
            }
        });
        self.inner.tick.set(Some(handle));
    }

    fn clear_tick(&self) {
        if let Some(handle) = self.inner.tick.take() {
            self.inner.engine.remove_tick(handle);
        }
    }
}

impl<V: Animatable> EventSource<V> for Transitionable<V> {
    fn source_id(&self) -> SourceId {
        self.inner.output.source_id()
    }

    fn add_listener(&self, channel: &str, callback: Callback<V>) -> ListenerId {
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
    use crate::curve::Easing;
    use crate::error::MotionError;
    use cadenza_events::EventSourceExt;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// 250ms is exactly representable, so elapsed-time sums stay exact.
    fn quarter_second() -> Duration {
        Duration::from_millis(250)
    }

    #[test]
    fn duration_curve_reaches_target_exactly_and_ends_once() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);

        let ends = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&ends);
        value.on(END, move |_: &f64| sink.set(sink.get() + 1));

        value
            .set(10.0, Transition::linear(Duration::from_millis(500)))
            .unwrap();
        assert!(value.is_active());

        engine.step(quarter_second());
        assert_eq!(value.value(), 5.0, "linear midpoint");
        engine.step(quarter_second());

        assert_eq!(value.value(), 10.0, "exact arrival at t = duration");
        assert_eq!(ends.get(), 1);
        assert!(!value.is_active());

        // Idle afterwards: no further emissions, no tick registration.
        engine.step(quarter_second());
        assert_eq!(ends.get(), 1);
        assert_eq!(engine.tick_count(), 0);
    }

    #[test]
    fn halt_freezes_midpoint_with_nonzero_velocity() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);

        let ends = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&ends);
        value.on(END, move |_: &f64| sink.set(sink.get() + 1));

        value
            .set(10.0, Transition::linear(Duration::from_millis(500)))
            .unwrap();
        engine.step(quarter_second());
        value.halt();

        assert_eq!(value.value(), 5.0);
        assert_eq!(value.velocity(), 20.0, "10 units over 0.5s");
        assert!(!value.is_active());
        assert_eq!(ends.get(), 0, "halt never emits end");

        engine.step(quarter_second());
        assert_eq!(value.value(), 5.0, "frozen after halt");
    }

    #[test]
    fn spring_settles_within_bounded_steps_then_stays_idle() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);
        value.set(1.0, Transition::spring(0.5, 0.8)).unwrap();

        let updates = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&updates);
        value.on(UPDATE, move |_: &f64| sink.set(sink.get() + 1));

        let mut steps = 0;
        while value.is_active() {
            engine.step_nominal();
            steps += 1;
            assert!(steps < 600, "spring failed to settle in bounded steps");
        }

        assert!((value.value() - 1.0).abs() < 1e-4);
        assert_eq!(value.velocity(), 0.0);

        let settled_updates = updates.get();
        engine.step_nominal();
        engine.step_nominal();
        assert_eq!(updates.get(), settled_updates, "no emissions after settling");
    }

    #[test]
    fn inertia_decays_velocity_to_rest() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);
        value
            .set(0.0, Transition::inertia(4.0).with_velocity(vec![8.0]))
            .unwrap();

        let mut steps = 0;
        while value.is_active() {
            engine.step_nominal();
            steps += 1;
            assert!(steps < 600, "inertia failed to decay in bounded steps");
        }

        // Flick travel converges to v0/drag.
        assert!((value.value() - 2.0).abs() < 1e-3);
        assert_eq!(value.velocity(), 0.0);
    }

    #[test]
    fn replacement_hands_off_velocity() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);
        value
            .set(10.0, Transition::linear(Duration::from_millis(500)))
            .unwrap();
        engine.step(quarter_second());
        assert_eq!(value.velocity(), 20.0);

        // Replace mid-flight without halting: velocity carries over.
        value.set(0.0, Transition::spring(1.0, 0.7)).unwrap();
        assert_eq!(value.velocity(), 20.0, "seed velocity preserved at install");
        assert_eq!(value.value(), 5.0, "position preserved at install");

        // The first samples keep moving upward before the spring pulls back.
        engine.step(Duration::from_millis(16));
        assert!(value.value() > 5.0, "hand-off velocity keeps carrying");
    }

    #[test]
    fn instant_transition_completes_synchronously() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 1.0f64);

        let log = Rc::new(RefCell::new(Vec::new()));
        for channel in [START, UPDATE, END] {
            let log = Rc::clone(&log);
            value.on(channel, move |v: &f64| log.borrow_mut().push((channel, *v)));
        }
        let completed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&completed);
        value
            .set_with(3.0, Transition::instant(), move || flag.set(true))
            .unwrap();

        assert_eq!(value.value(), 3.0);
        assert!(!value.is_active());
        assert!(completed.get());
        assert_eq!(
            *log.borrow(),
            vec![(START, 1.0), (UPDATE, 3.0), (END, 3.0)]
        );
        assert_eq!(engine.tick_count(), 0);
    }

    #[test]
    fn invalid_config_fails_fast_and_stays_static() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 2.0f64);

        let result = value.set(5.0, Transition::eased(Duration::ZERO, Easing::Linear));
        assert_eq!(result, Err(MotionError::NonPositiveDuration));
        assert!(!value.is_active());
        assert_eq!(value.value(), 2.0);
        engine.step_nominal();
        assert_eq!(value.value(), 2.0);
    }

    #[test]
    fn reset_discards_curve_and_callback() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);

        let completed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&completed);
        value
            .set_with(
                10.0,
                Transition::linear(Duration::from_millis(500)),
                move || flag.set(true),
            )
            .unwrap();
        engine.step(quarter_second());

        value.reset(7.0);
        assert_eq!(value.value(), 7.0);
        assert_eq!(value.velocity(), 0.0);
        assert!(!value.is_active());

        for _ in 0..4 {
            engine.step(quarter_second());
        }
        assert!(!completed.get(), "reset discards the completion callback");
    }

    #[test]
    fn vector_values_animate_per_component() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, [0.0, 100.0]);
        value
            .set([10.0, 0.0], Transition::linear(Duration::from_millis(500)))
            .unwrap();
        engine.step(quarter_second());
        assert_eq!(value.value(), [5.0, 50.0]);
        engine.step(quarter_second());
        assert_eq!(value.value(), [10.0, 0.0]);
    }

    #[test]
    fn callback_runs_exactly_once_on_natural_completion() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);

        let completions = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&completions);
        value
            .set_with(
                1.0,
                Transition::linear(Duration::from_millis(250)),
                move || sink.set(sink.get() + 1),
            )
            .unwrap();

        for _ in 0..4 {
            engine.step(quarter_second());
        }
        assert_eq!(completions.get(), 1);
    }

    #[test]
    fn update_emissions_flow_while_active() {
        let engine = Engine::new();
        let value = Transitionable::new(&engine, 0.0f64);

        let updates = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&updates);
        value.on(UPDATE, move |v: &f64| sink.borrow_mut().push(*v));

        value
            .set(1.0, Transition::linear(Duration::from_millis(500)))
            .unwrap();
        engine.step(quarter_second());
        engine.step(quarter_second());
        assert_eq!(*updates.borrow(), vec![0.5, 1.0]);
    }
}
