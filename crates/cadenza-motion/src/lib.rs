#![forbid(unsafe_code)]

//! Time-driven value interpolation.
//!
//! A [`Transitionable`] holds a scalar or small-vector value and animates it
//! toward a target under a selectable interpolation law ([`Curve`]): instant
//! assignment, fixed-duration easing, a damped spring, or velocity-seeded
//! inertia. While active it is advanced once per engine step and emits its
//! evolving value on the `"update"` channel, making it a drop-in source for
//! the dataflow combinators.
//!
//! Interruption is first-class: [`halt`](Transitionable::halt) freezes the
//! value mid-flight and preserves the instantaneous velocity, and a `set`
//! while a curve is running hands position *and* velocity to the next curve,
//! so chained animations stay seamless.
//!
//! # Invariants
//!
//! 1. At most one curve is active per transitionable at any time.
//! 2. Completion emits a final exact `"update"`, then `"end"`, invokes the
//!    completion callback once, and deactivates; `halt` does none of these.
//! 3. Invalid curve configuration fails fast with [`MotionError`]: no
//!    animation starts and the value stays static.
//! 4. Every curve accepts a non-zero starting velocity, whether seeded
//!    explicitly or handed off from an interrupted predecessor.

mod curve;
mod error;
mod transitionable;
mod value;

pub use curve::{Curve, Easing, Kinematics, Transition};
pub use error::{MotionError, Result};
pub use transitionable::Transitionable;
pub use value::Animatable;
