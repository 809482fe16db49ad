#![forbid(unsafe_code)]

//! The scheduler's notion of "where in the frame we are".

/// Frame phase, advanced by [`Engine::step`](crate::Engine::step).
///
/// Deferred work belongs in a different queue depending on the phase active
/// when the deferral happens; see
/// [`Engine::defer_current`](crate::Engine::defer_current).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Between steps and during the pre-tick drain: inputs are arriving.
    #[default]
    Start,
    /// Tick and post-tick: per-frame recomputation and its consumers.
    Update,
    /// Dirty drain: everything for this frame has been observed.
    End,
}
