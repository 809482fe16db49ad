#![forbid(unsafe_code)]

//! The engine: queues, phase marker, tick registry, and the resize boundary.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use cadenza_events::{Emitter, EventHandler, RESIZE};
use web_time::Duration;

use crate::phase::Phase;

/// Environment size fed through the resize boundary, `[width, height]`.
pub type Size = [f64; 2];

type Job = Box<dyn FnOnce()>;
type TickFn = Rc<dyn Fn(Duration)>;

/// Token for a persistent tick registration; pass back to
/// [`Engine::remove_tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

/// Engine tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Frame delta assumed when the driver cannot measure one (first frame,
    /// resumed-from-idle frame).
    pub nominal_frame: Duration,
    /// Upper bound on a measured frame delta. A driver that was suspended for
    /// seconds must not advance animations by seconds in one step.
    pub max_frame_delta: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // ~60Hz.
            nominal_frame: Duration::from_micros(16_667),
            max_frame_delta: Duration::from_millis(100),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    phase: Cell<Phase>,
    frame: Cell<u64>,
    pre_tick: RefCell<VecDeque<Job>>,
    post_tick: RefCell<VecDeque<Job>>,
    dirty: RefCell<VecDeque<Job>>,
    ticks: RefCell<Vec<(TickHandle, TickFn)>>,
    next_tick: Cell<u64>,
    roots: Cell<usize>,
    resize: EventHandler<Size>,
    window: Cell<Option<Size>>,
}

/// The staged single-threaded scheduler.
///
/// Cheaply cloneable handle over shared state; every component that needs to
/// query the phase or defer work holds a clone. Lifecycle is
/// `new → step()* → shutdown`.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phase", &self.inner.phase.get())
            .field("frame", &self.inner.frame.get())
            .field("ticks", &self.inner.ticks.borrow().len())
            .field("roots", &self.inner.roots.get())
            .finish()
    }
}

impl Engine {
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with an explicit configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                config,
                phase: Cell::new(Phase::Start),
                frame: Cell::new(0),
                pre_tick: RefCell::new(VecDeque::new()),
                post_tick: RefCell::new(VecDeque::new()),
                dirty: RefCell::new(VecDeque::new()),
                ticks: RefCell::new(Vec::new()),
                next_tick: Cell::new(1),
                roots: Cell::new(0),
                resize: EventHandler::new(),
                window: Cell::new(None),
            }),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.inner.config
    }

    /// The phase currently executing (or `Start` between steps).
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Number of completed steps.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.inner.frame.get()
    }

    // ── Queues ──────────────────────────────────────────────────────────────

    /// Queue a job for the next pre-tick drain.
    pub fn push_pre_tick(&self, job: impl FnOnce() + 'static) {
        self.inner.pre_tick.borrow_mut().push_back(Box::new(job));
    }

    /// Queue a job for the next post-tick drain.
    pub fn push_post_tick(&self, job: impl FnOnce() + 'static) {
        self.inner.post_tick.borrow_mut().push_back(Box::new(job));
    }

    /// Queue a job for the next dirty drain.
    pub fn push_dirty(&self, job: impl FnOnce() + 'static) {
        self.inner.dirty.borrow_mut().push_back(Box::new(job));
    }

    /// Queue a job into the earliest drain consistent with causality at the
    /// current phase: pre-tick while inputs arrive, post-tick mid-frame,
    /// dirty once the frame has been observed.
    pub fn defer_current(&self, job: impl FnOnce() + 'static) {
        match self.phase() {
            Phase::Start => self.push_pre_tick(job),
            Phase::Update => self.push_post_tick(job),
            Phase::End => self.push_dirty(job),
        }
    }

    // ── Tick registry ───────────────────────────────────────────────────────

    /// Register a callback invoked once per step with the frame delta.
    ///
    /// Registrations made while a step is running first fire on the next
    /// step.
    pub fn add_tick(&self, tick: impl Fn(Duration) + 'static) -> TickHandle {
        let handle = TickHandle(self.inner.next_tick.get());
        self.inner.next_tick.set(self.inner.next_tick.get() + 1);
        self.inner.ticks.borrow_mut().push((handle, Rc::new(tick)));
        handle
    }

    /// Remove a tick registration. Takes effect immediately, including for
    /// the remainder of an in-flight snapshot walk.
    pub fn remove_tick(&self, handle: TickHandle) {
        self.inner
            .ticks
            .borrow_mut()
            .retain(|(existing, _)| *existing != handle);
    }

    /// Number of live tick registrations.
    #[must_use]
    pub fn tick_count(&self) -> usize {
        self.inner.ticks.borrow().len()
    }

    // ── Interest tracking ───────────────────────────────────────────────────

    /// Record an interested consumer (a mounted root). While any consumer is
    /// registered the driver should keep scheduling frames.
    pub fn register_root(&self) {
        self.inner.roots.set(self.inner.roots.get() + 1);
        tracing::debug!(roots = self.inner.roots.get(), "root registered");
    }

    /// Drop one consumer registration.
    pub fn deregister_root(&self) {
        let roots = self.inner.roots.get().saturating_sub(1);
        self.inner.roots.set(roots);
        tracing::debug!(roots, "root deregistered");
    }

    /// Whether another frame is wanted: any consumer registered, any tick
    /// callback live, or any queued work pending.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.roots.get() > 0
            || !self.inner.ticks.borrow().is_empty()
            || !self.inner.pre_tick.borrow().is_empty()
            || !self.inner.post_tick.borrow().is_empty()
            || !self.inner.dirty.borrow().is_empty()
    }

    // ── Stepping ────────────────────────────────────────────────────────────

    /// Run one frame: drain the queues in phase order, advancing the phase
    /// marker. `dt` is the frame delta handed to every tick callback.
    pub fn step(&self, dt: Duration) {
        let inner = &self.inner;
        tracing::trace!(frame = inner.frame.get(), ?dt, "step");

        // Input arrival. Items pushed by drained items run this step too.
        Self::drain(&inner.pre_tick);

        inner.phase.set(Phase::Update);
        let snapshot: Vec<(TickHandle, TickFn)> = inner
            .ticks
            .borrow()
            .iter()
            .map(|(handle, tick)| (*handle, Rc::clone(tick)))
            .collect();
        for (handle, tick) in snapshot {
            let live = inner
                .ticks
                .borrow()
                .iter()
                .any(|(existing, _)| *existing == handle);
            if live {
                (*tick)(dt);
            }
        }

        // Consumers of this frame's resolved values.
        Self::drain(&inner.post_tick);

        inner.phase.set(Phase::End);
        Self::drain(&inner.dirty);

        inner.phase.set(Phase::Start);
        inner.frame.set(inner.frame.get() + 1);
    }

    /// Run one frame with the nominal frame delta from the configuration.
    pub fn step_nominal(&self) {
        self.step(self.inner.config.nominal_frame);
    }

    /// Clear every queue, tick registration, and consumer registration. The
    /// engine returns to its freshly-constructed state (frame counter aside).
    pub fn shutdown(&self) {
        let inner = &self.inner;
        inner.pre_tick.borrow_mut().clear();
        inner.post_tick.borrow_mut().clear();
        inner.dirty.borrow_mut().clear();
        inner.ticks.borrow_mut().clear();
        inner.roots.set(0);
        inner.phase.set(Phase::Start);
        tracing::debug!(frame = inner.frame.get(), "engine shut down");
    }

    fn drain(queue: &RefCell<VecDeque<Job>>) {
        loop {
            // Pop before invoking so the job can push into this same queue.
            let job = queue.borrow_mut().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    // ── Resize boundary ─────────────────────────────────────────────────────

    /// Feed an environment resize. Returns `false` (and does nothing) when
    /// the size is unchanged.
    ///
    /// A changed size is announced twice per step, matching how downstream
    /// size streams want to observe it: once in pre-tick, so this frame is
    /// laid out against the new size, and once in the dirty phase, after
    /// every consumer has seen the frame.
    pub fn notify_resize(&self, size: Size) -> bool {
        if self.inner.window.get() == Some(size) {
            return false;
        }
        self.inner.window.set(Some(size));

        let resize = self.inner.resize.clone();
        let engine = self.clone();
        self.push_pre_tick(move || {
            resize.emit(RESIZE, &size);
            let resize = resize.clone();
            engine.push_dirty(move || resize.emit(RESIZE, &size));
        });
        tracing::debug!(?size, "resize queued");
        true
    }

    /// The handler on which [`notify_resize`](Engine::notify_resize)
    /// announcements are emitted (`"resize"` channel).
    #[must_use]
    pub fn resizes(&self) -> EventHandler<Size> {
        self.inner.resize.clone()
    }

    /// Last size passed to [`notify_resize`](Engine::notify_resize).
    #[must_use]
    pub fn window_size(&self) -> Option<Size> {
        self.inner.window.get()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_events::EventSourceExt;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn dt() -> Duration {
        Duration::from_micros(16_667)
    }

    #[test]
    fn phases_advance_in_order() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let observed = |tag: &'static str, engine: &Engine, log: &Rc<RefCell<Vec<(&'static str, Phase)>>>| {
            let engine = engine.clone();
            let log = Rc::clone(log);
            move || log.borrow_mut().push((tag, engine.phase()))
        };

        engine.push_pre_tick(observed("pre", &engine, &log));
        engine.push_post_tick(observed("post", &engine, &log));
        engine.push_dirty(observed("dirty", &engine, &log));
        {
            let engine2 = engine.clone();
            let log = Rc::clone(&log);
            engine.add_tick(move |_| log.borrow_mut().push(("tick", engine2.phase())));
        }

        engine.step(dt());
        assert_eq!(
            *log.borrow(),
            vec![
                ("pre", Phase::Start),
                ("tick", Phase::Update),
                ("post", Phase::Update),
                ("dirty", Phase::End),
            ]
        );
        assert_eq!(engine.phase(), Phase::Start);
        assert_eq!(engine.frame(), 1);
    }

    #[test]
    fn pre_tick_drains_to_empty_within_one_step() {
        let engine = Engine::new();
        let hits = Rc::new(Cell::new(0u32));

        let engine2 = engine.clone();
        let hits2 = Rc::clone(&hits);
        engine.push_pre_tick(move || {
            hits2.set(hits2.get() + 1);
            let hits3 = Rc::clone(&hits2);
            engine2.push_pre_tick(move || hits3.set(hits3.get() + 1));
        });

        engine.step(dt());
        assert_eq!(hits.get(), 2, "nested pre-tick item runs in the same step");
    }

    #[test]
    fn tick_items_persist_across_steps() {
        let engine = Engine::new();
        let hits = Rc::new(Cell::new(0u32));
        let hits2 = Rc::clone(&hits);
        engine.add_tick(move |_| hits2.set(hits2.get() + 1));

        engine.step(dt());
        engine.step(dt());
        engine.step(dt());
        assert_eq!(hits.get(), 3);
    }

    #[test]
    fn tick_registered_mid_step_runs_next_step() {
        let engine = Engine::new();
        let hits = Rc::new(Cell::new(0u32));

        let engine2 = engine.clone();
        let hits2 = Rc::clone(&hits);
        let registered = Rc::new(Cell::new(false));
        let registered2 = Rc::clone(&registered);
        engine.add_tick(move |_| {
            if !registered2.get() {
                registered2.set(true);
                let hits3 = Rc::clone(&hits2);
                engine2.add_tick(move |_| hits3.set(hits3.get() + 1));
            }
        });

        engine.step(dt());
        assert_eq!(hits.get(), 0, "snapshot excludes mid-step registration");
        engine.step(dt());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn tick_removed_mid_step_is_skipped() {
        let engine = Engine::new();
        let hits = Rc::new(Cell::new(0u32));

        let victim_slot: Rc<RefCell<Option<TickHandle>>> = Rc::new(RefCell::new(None));
        let engine2 = engine.clone();
        let slot2 = Rc::clone(&victim_slot);
        engine.add_tick(move |_| {
            if let Some(handle) = slot2.borrow_mut().take() {
                engine2.remove_tick(handle);
            }
        });
        let hits2 = Rc::clone(&hits);
        let victim = engine.add_tick(move |_| hits2.set(hits2.get() + 1));
        *victim_slot.borrow_mut() = Some(victim);

        engine.step(dt());
        assert_eq!(hits.get(), 0, "removed registration must not fire");
        engine.step(dt());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn defer_current_picks_phase_matching_queue() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        // Deferred while idle (Start) → runs during pre-tick of this step.
        {
            let log = Rc::clone(&log);
            engine.defer_current(move || log.borrow_mut().push("from-start"));
        }
        // Deferred from a tick (Update) → runs post-tick, same step.
        {
            let engine2 = engine.clone();
            let log = Rc::clone(&log);
            let once = Cell::new(false);
            engine.add_tick(move |_| {
                if !once.replace(true) {
                    let log = Rc::clone(&log);
                    engine2.defer_current(move || log.borrow_mut().push("from-update"));
                }
            });
        }
        // Deferred from the dirty drain (End) → runs in the same drain.
        {
            let engine2 = engine.clone();
            let log = Rc::clone(&log);
            engine.push_dirty(move || {
                let log = Rc::clone(&log);
                engine2.defer_current(move || log.borrow_mut().push("from-end"));
            });
        }

        engine.step(dt());
        assert_eq!(
            *log.borrow(),
            vec!["from-start", "from-update", "from-end"],
            "each deferral lands in the earliest drain of its phase"
        );
    }

    #[test]
    fn is_active_tracks_consumers_and_work() {
        let engine = Engine::new();
        assert!(!engine.is_active());

        engine.register_root();
        assert!(engine.is_active());
        engine.deregister_root();
        assert!(!engine.is_active());

        let handle = engine.add_tick(|_| {});
        assert!(engine.is_active());
        engine.remove_tick(handle);
        assert!(!engine.is_active());

        engine.push_dirty(|| {});
        assert!(engine.is_active());
        engine.step(dt());
        assert!(!engine.is_active());
    }

    #[test]
    fn resize_emits_pre_tick_and_dirty_once_each() {
        let engine = Engine::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let engine2 = engine.clone();
        let log2 = Rc::clone(&log);
        engine.resizes().on(RESIZE, move |size: &Size| {
            log2.borrow_mut().push((engine2.phase(), *size));
        });

        assert!(engine.notify_resize([800.0, 600.0]));
        engine.step(dt());
        assert_eq!(
            *log.borrow(),
            vec![
                (Phase::Start, [800.0, 600.0]),
                (Phase::End, [800.0, 600.0]),
            ]
        );
    }

    #[test]
    fn unchanged_resize_is_suppressed() {
        let engine = Engine::new();
        assert!(engine.notify_resize([100.0, 100.0]));
        engine.step(dt());
        assert!(!engine.notify_resize([100.0, 100.0]));
        assert!(engine.notify_resize([100.0, 200.0]));
    }

    #[test]
    fn shutdown_clears_everything() {
        let engine = Engine::new();
        engine.register_root();
        engine.add_tick(|_| {});
        engine.push_pre_tick(|| panic!("must not run"));
        engine.push_dirty(|| panic!("must not run"));

        engine.shutdown();
        assert!(!engine.is_active());
        engine.step(dt());
    }

    #[test]
    fn emitting_resize_through_handler_contract() {
        // External notifiers use the plain emitter contract.
        let engine = Engine::new();
        let seen = Rc::new(Cell::new(0usize));

        let downstream: EventHandler<Size> = EventHandler::new();
        downstream.subscribe(&engine.resizes());
        let seen2 = Rc::clone(&seen);
        downstream.on(RESIZE, move |_| seen2.set(seen2.get() + 1));

        engine.notify_resize([10.0, 10.0]);
        engine.step(dt());
        assert_eq!(seen.get(), 2);
    }
}
