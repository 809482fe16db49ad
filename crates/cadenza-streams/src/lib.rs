#![forbid(unsafe_code)]

//! Dataflow combinators over event sources.
//!
//! A [`Stream`] is a node in the dataflow graph: it recomputes a derived
//! value from one or more source nodes through a pure combining function and
//! re-emits only when the result actually changed. Recomputation is
//! pull-triggered by upstream emission, never time-driven.
//!
//! # Phase coalescing
//!
//! Upstream arrivals do not recompute inline. The first arrival inside a
//! phase window schedules exactly one flush into the engine queue matching
//! the current phase. Pre-tick arrivals flush within pre-tick, mid-frame
//! arrivals flush in post-tick, end-phase arrivals flush in the dirty drain.
//! Simultaneous arrivals from independent sources therefore collapse into a
//! single downstream event, and a cascade of streams converges within one
//! step instead of fanning out.
//!
//! # Invariants
//!
//! 1. A stream never emits two consecutive value-equal payloads ([`Stream`]),
//!    except the resize variant ([`ResizeStream`]), which is gated by a dirty
//!    flag instead: at most one `"resize"` emission per step, regardless of
//!    value.
//! 2. A combining function is never invoked while any required source has
//!    not yet produced a value; "not yet available" propagates instead.
//! 3. The dependency graph must be acyclic; this is a construction-time
//!    precondition and is not checked at runtime.

mod gate;
mod resize;
mod stream;

pub use resize::ResizeStream;
pub use stream::Stream;
