#![forbid(unsafe_code)]

//! Curve configuration errors.

use thiserror::Error;

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, MotionError>;

/// A caller error in a transition configuration.
///
/// Signalled by failing fast at `set` time: no animation starts and the
/// value stays static.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MotionError {
    #[error("eased transition duration must be positive")]
    NonPositiveDuration,

    #[error("spring period must be positive and finite, got {period}")]
    InvalidPeriod { period: f64 },

    #[error("spring damping ratio must be positive and finite, got {damping}")]
    InvalidDamping { damping: f64 },

    #[error("inertia drag must be positive and finite, got {drag}")]
    InvalidDrag { drag: f64 },

    #[error("seed velocity has {got} components, the value has {expected}")]
    VelocityDimension { expected: usize, got: usize },
}
