#![forbid(unsafe_code)]

//! Staged per-frame scheduling.
//!
//! One [`Engine::step`] call is one frame. A step drains four work lists in a
//! fixed order while advancing a queryable [`Phase`] marker:
//!
//! ```text
//! drain pre-tick           (phase: Start)
//! invoke tick snapshot     (phase: Update)
//! drain post-tick          (phase: Update)
//! drain dirty              (phase: End)
//! reset                    (phase: Start)
//! ```
//!
//! Pre-tick, post-tick, and dirty are drain-to-empty FIFO queues of one-shot
//! jobs: a job may push further jobs into its own queue and they still run
//! within the same step, giving one level of intra-step convergence. The tick
//! list instead holds *persistent* per-frame callbacks; each step invokes a
//! snapshot taken when the Update phase begins.
//!
//! Phase separation is what prevents read-after-write races inside a frame:
//! input arrival (pre-tick), steady recomputation (tick), consumers reacting
//! to the frame's resolved values (post-tick), and end-of-frame bookkeeping
//! that must only run after every consumer has seen the frame (dirty). Code
//! running at any point can ask the engine which phase it is in and defer
//! work into the matching queue via [`Engine::defer_current`].
//!
//! The engine does not own a loop. An external driver calls `step` once per
//! display refresh while [`Engine::is_active`] reports interested consumers,
//! and goes idle otherwise; [`FrameClock`] converts driver callbacks into
//! clamped frame deltas.
//!
//! # Invariants
//!
//! 1. Queue order within a step is always pre-tick → tick → post-tick →
//!    dirty.
//! 2. Tick callbacks registered during a step first run on the next step;
//!    callbacks deregistered during a step are skipped for the remainder of
//!    the snapshot walk.
//! 3. Pre-tick items observe the graph state left by the previous step's
//!    dirty phase; dirty items observe every tick and post-tick effect of
//!    the current step.
//!
//! # Failure Modes
//!
//! - A job that pushes unboundedly into its own queue never lets the drain
//!   terminate. That is a configuration bug in the caller's graph; the
//!   engine deliberately applies no iteration cap (single convergence pass).

mod clock;
mod engine;
mod phase;

pub use clock::FrameClock;
pub use engine::{Engine, EngineConfig, Size, TickHandle};
pub use phase::Phase;
