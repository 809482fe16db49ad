#![forbid(unsafe_code)]

//! The curve catalogue and its analytic solvers.
//!
//! Curves are evaluated analytically from elapsed time rather than
//! integrated step by step, so convergence does not depend on tick jitter:
//! the same elapsed time always produces the same position and velocity.

use std::f64::consts::TAU;

use web_time::Duration;

use crate::error::{MotionError, Result};

/// Settled when every component is at least this close to the target.
pub(crate) const POSITION_EPSILON: f64 = 1e-4;
/// Settled when every component speed is below this threshold (units/s).
pub(crate) const VELOCITY_EPSILON: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Kinematics
// ---------------------------------------------------------------------------

/// Instantaneous motion state handed between curves at transition
/// boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct Kinematics {
    /// Current value, one entry per component.
    pub position: Vec<f64>,
    /// Current rate of change, units per second.
    pub velocity: Vec<f64>,
}

impl Kinematics {
    /// Motion state at rest at `position`.
    #[must_use]
    pub fn at_rest(position: Vec<f64>) -> Self {
        let velocity = vec![0.0; position.len()];
        Self { position, velocity }
    }

    /// Largest absolute component speed.
    #[must_use]
    pub fn max_speed(&self) -> f64 {
        self.velocity.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Easing shape for duration-based curves. All shapes map 0 → 0 and 1 → 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Easing {
    /// Constant-rate interpolation.
    Linear,
    /// Cubic acceleration from rest.
    EaseIn,
    /// Cubic deceleration into the target.
    EaseOut,
    /// Cubic acceleration then deceleration.
    #[default]
    EaseInOut,
}

impl Easing {
    /// Eased progress for `u` in [0, 1].
    #[must_use]
    pub fn apply(self, u: f64) -> f64 {
        match self {
            Self::Linear => u,
            Self::EaseIn => u * u * u,
            Self::EaseOut => {
                let inv = 1.0 - u;
                1.0 - inv * inv * inv
            }
            Self::EaseInOut => {
                if u < 0.5 {
                    4.0 * u * u * u
                } else {
                    let inv = 2.0 - 2.0 * u;
                    1.0 - inv * inv * inv / 2.0
                }
            }
        }
    }

    /// d(apply)/du, used to report instantaneous velocity.
    #[must_use]
    pub fn derivative(self, u: f64) -> f64 {
        match self {
            Self::Linear => 1.0,
            Self::EaseIn => 3.0 * u * u,
            Self::EaseOut => {
                let inv = 1.0 - u;
                3.0 * inv * inv
            }
            Self::EaseInOut => {
                if u < 0.5 {
                    12.0 * u * u
                } else {
                    let inv = 2.0 - 2.0 * u;
                    3.0 * inv * inv
                }
            }
        }
    }
}

/// An interpolation law, dispatched by kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Curve {
    /// Assign the target immediately; no tick registration.
    Instant,
    /// Eased interpolation reaching the target exactly at `duration`.
    Eased {
        /// Total animation time.
        duration: Duration,
        /// Progress shape.
        easing: Easing,
    },
    /// Second-order damped oscillator. Settles within an epsilon of the
    /// target with near-zero velocity.
    Spring {
        /// Undamped oscillation period in seconds (`ω₀ = 2π / period`).
        period: f64,
        /// Damping ratio: `< 1` underdamped, `1` critical, `> 1` overdamped.
        damping: f64,
    },
    /// First-order exponential decay of velocity under drag, asymptotically
    /// approaching its limit. Ends when the speed falls below a threshold.
    Inertia {
        /// Decay rate in 1/seconds.
        drag: f64,
    },
}

/// A curve plus its optional seed velocity, the full `set` configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// The interpolation law to install.
    pub curve: Curve,
    /// Starting velocity, one entry per component. When absent, the
    /// transitionable's current velocity is used (hand-off).
    pub velocity: Option<Vec<f64>>,
}

impl Transition {
    /// Immediate assignment.
    #[must_use]
    pub fn instant() -> Self {
        Curve::Instant.into()
    }

    /// Eased interpolation over `duration`.
    #[must_use]
    pub fn eased(duration: Duration, easing: Easing) -> Self {
        Curve::Eased { duration, easing }.into()
    }

    /// Constant-rate interpolation over `duration`.
    #[must_use]
    pub fn linear(duration: Duration) -> Self {
        Self::eased(duration, Easing::Linear)
    }

    /// Damped spring with the given period (seconds) and damping ratio.
    #[must_use]
    pub fn spring(period: f64, damping: f64) -> Self {
        Curve::Spring { period, damping }.into()
    }

    /// Velocity decay under `drag` (1/seconds).
    #[must_use]
    pub fn inertia(drag: f64) -> Self {
        Curve::Inertia { drag }.into()
    }

    /// Seed the starting velocity explicitly.
    #[must_use]
    pub fn with_velocity(mut self, velocity: impl Into<Vec<f64>>) -> Self {
        self.velocity = Some(velocity.into());
        self
    }

    /// Fail fast on caller errors before any state changes.
    pub(crate) fn validate(&self, dim: usize) -> Result<()> {
        match self.curve {
            Curve::Instant => {}
            Curve::Eased { duration, .. } => {
                if duration.is_zero() {
                    return Err(MotionError::NonPositiveDuration);
                }
            }
            Curve::Spring { period, damping } => {
                if !(period.is_finite() && period > 0.0) {
                    return Err(MotionError::InvalidPeriod { period });
                }
                if !(damping.is_finite() && damping > 0.0) {
                    return Err(MotionError::InvalidDamping { damping });
                }
            }
            Curve::Inertia { drag } => {
                if !(drag.is_finite() && drag > 0.0) {
                    return Err(MotionError::InvalidDrag { drag });
                }
            }
        }
        if let Some(velocity) = &self.velocity {
            if velocity.len() != dim {
                return Err(MotionError::VelocityDimension {
                    expected: dim,
                    got: velocity.len(),
                });
            }
        }
        Ok(())
    }
}

impl From<Curve> for Transition {
    fn from(curve: Curve) -> Self {
        Self {
            curve,
            velocity: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Solvers
// ---------------------------------------------------------------------------

/// A curve bound to its starting conditions, sampled by elapsed time.
pub(crate) enum Solver {
    Eased {
        duration: f64,
        easing: Easing,
        from: Vec<f64>,
        to: Vec<f64>,
    },
    Spring {
        omega: f64,
        zeta: f64,
        /// Displacement from target at t = 0, per component.
        x0: Vec<f64>,
        v0: Vec<f64>,
        target: Vec<f64>,
    },
    Inertia {
        drag: f64,
        start: Vec<f64>,
        v0: Vec<f64>,
    },
}

impl Solver {
    /// Bind `curve` to starting conditions. `Instant` never reaches a
    /// solver; the transitionable assigns it synchronously.
    pub(crate) fn build(
        curve: Curve,
        position: Vec<f64>,
        velocity: Vec<f64>,
        target: Vec<f64>,
    ) -> Self {
        match curve {
            Curve::Instant => unreachable!("instant curves are assigned, not solved"),
            Curve::Eased { duration, easing } => Self::Eased {
                duration: duration.as_secs_f64(),
                easing,
                from: position,
                to: target,
            },
            Curve::Spring { period, damping } => {
                let x0 = position
                    .iter()
                    .zip(&target)
                    .map(|(x, t)| x - t)
                    .collect();
                Self::Spring {
                    omega: TAU / period,
                    zeta: damping,
                    x0,
                    v0: velocity,
                    target,
                }
            }
            Curve::Inertia { drag } => {
                // A rest start is oriented toward the target; a live seed
                // keeps its own direction and decays toward its natural
                // stopping point.
                let v0 = if velocity.iter().all(|v| v.abs() < VELOCITY_EPSILON) {
                    position
                        .iter()
                        .zip(&target)
                        .map(|(x, t)| drag * (t - x))
                        .collect()
                } else {
                    velocity
                };
                Self::Inertia {
                    drag,
                    start: position,
                    v0,
                }
            }
        }
    }

    /// Evaluate at `elapsed` seconds since installation.
    ///
    /// Returns position, velocity, and whether the curve has converged. On
    /// convergence the returned position is exact (eased, spring) and the
    /// velocity is zero.
    pub(crate) fn sample(&self, elapsed: f64) -> (Vec<f64>, Vec<f64>, bool) {
        match self {
            Self::Eased {
                duration,
                easing,
                from,
                to,
            } => {
                if elapsed >= *duration {
                    return (to.clone(), vec![0.0; to.len()], true);
                }
                let u = elapsed / duration;
                let progress = easing.apply(u);
                let rate = easing.derivative(u) / duration;
                let position = from
                    .iter()
                    .zip(to)
                    .map(|(f, t)| f + (t - f) * progress)
                    .collect();
                let velocity = from.iter().zip(to).map(|(f, t)| (t - f) * rate).collect();
                (position, velocity, false)
            }
            Self::Spring {
                omega,
                zeta,
                x0,
                v0,
                target,
            } => {
                let mut position = Vec::with_capacity(target.len());
                let mut velocity = Vec::with_capacity(target.len());
                let mut settled = true;
                for ((x0, v0), goal) in x0.iter().zip(v0).zip(target) {
                    let (x, v) = spring_component(*omega, *zeta, *x0, *v0, elapsed);
                    if x.abs() >= POSITION_EPSILON || v.abs() >= VELOCITY_EPSILON {
                        settled = false;
                    }
                    position.push(goal + x);
                    velocity.push(v);
                }
                if settled {
                    (target.clone(), vec![0.0; target.len()], true)
                } else {
                    (position, velocity, false)
                }
            }
            Self::Inertia { drag, start, v0 } => {
                let decay = (-drag * elapsed).exp();
                let position = start
                    .iter()
                    .zip(v0)
                    .map(|(x, v)| x + v / drag * (1.0 - decay))
                    .collect();
                let velocity: Vec<f64> = v0.iter().map(|v| v * decay).collect();
                let done = velocity.iter().all(|v| v.abs() < VELOCITY_EPSILON);
                if done {
                    (position, vec![0.0; v0.len()], true)
                } else {
                    (position, velocity, false)
                }
            }
        }
    }
}

/// Closed-form damped oscillator displacement and velocity for one
/// component, relative to the target.
fn spring_component(omega: f64, zeta: f64, x0: f64, v0: f64, t: f64) -> (f64, f64) {
    const CRITICAL_BAND: f64 = 1e-6;
    if (zeta - 1.0).abs() < CRITICAL_BAND {
        // Critically damped: x = (A + Bt)·e^(−ωt).
        let a = x0;
        let b = v0 + omega * x0;
        let envelope = (-omega * t).exp();
        let x = (a + b * t) * envelope;
        let v = (b - omega * (a + b * t)) * envelope;
        (x, v)
    } else if zeta < 1.0 {
        // Underdamped: decaying oscillation at ω_d.
        let omega_d = omega * (1.0 - zeta * zeta).sqrt();
        let decay = zeta * omega;
        let a = x0;
        let b = (v0 + decay * x0) / omega_d;
        let envelope = (-decay * t).exp();
        let (sin, cos) = (omega_d * t).sin_cos();
        let x = envelope * (a * cos + b * sin);
        let v = envelope * ((b * omega_d - decay * a) * cos - (a * omega_d + decay * b) * sin);
        (x, v)
    } else {
        // Overdamped: two real decay rates.
        let root = omega * (zeta * zeta - 1.0).sqrt();
        let r1 = -zeta * omega + root;
        let r2 = -zeta * omega - root;
        let c1 = (v0 - r2 * x0) / (r1 - r2);
        let c2 = x0 - c1;
        let e1 = (r1 * t).exp();
        let e2 = (r2 * t).exp();
        let x = c1 * e1 + c2 * e2;
        let v = c1 * r1 * e1 + c2 * r2 * e2;
        (x, v)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easing_endpoints() {
        for easing in [
            Easing::Linear,
            Easing::EaseIn,
            Easing::EaseOut,
            Easing::EaseInOut,
        ] {
            assert_eq!(easing.apply(0.0), 0.0, "{easing:?} at 0");
            assert!((easing.apply(1.0) - 1.0).abs() < 1e-12, "{easing:?} at 1");
        }
    }

    #[test]
    fn easing_is_monotonic() {
        for easing in [
            Easing::Linear,
            Easing::EaseIn,
            Easing::EaseOut,
            Easing::EaseInOut,
        ] {
            let mut previous = 0.0;
            for step in 1..=100 {
                let value = easing.apply(f64::from(step) / 100.0);
                assert!(value >= previous, "{easing:?} not monotonic");
                previous = value;
            }
        }
    }

    #[test]
    fn eased_solver_hits_target_exactly_at_duration() {
        let solver = Solver::build(
            Curve::Eased {
                duration: Duration::from_millis(500),
                easing: Easing::Linear,
            },
            vec![0.0],
            vec![0.0],
            vec![10.0],
        );
        let (position, velocity, done) = solver.sample(0.5);
        assert_eq!(position, vec![10.0]);
        assert_eq!(velocity, vec![0.0]);
        assert!(done);

        let (position, _, done) = solver.sample(0.25);
        assert_eq!(position, vec![5.0]);
        assert!(!done);
    }

    #[test]
    fn spring_settles_to_target() {
        let solver = Solver::build(
            Curve::Spring {
                period: 0.5,
                damping: 0.8,
            },
            vec![0.0],
            vec![0.0],
            vec![1.0],
        );
        let (position, velocity, done) = solver.sample(10.0);
        assert!(done);
        assert_eq!(position, vec![1.0]);
        assert_eq!(velocity, vec![0.0]);
    }

    #[test]
    fn spring_respects_initial_velocity() {
        // Same displacement, opposite seed velocities: trajectories differ.
        let still = Solver::build(
            Curve::Spring {
                period: 1.0,
                damping: 0.5,
            },
            vec![0.0],
            vec![0.0],
            vec![1.0],
        );
        let moving = Solver::build(
            Curve::Spring {
                period: 1.0,
                damping: 0.5,
            },
            vec![0.0],
            vec![5.0],
            vec![1.0],
        );
        let (x_still, _, _) = still.sample(0.1);
        let (x_moving, _, _) = moving.sample(0.1);
        assert!(x_moving[0] > x_still[0], "seed velocity carries the value further");
    }

    #[test]
    fn critical_and_overdamped_springs_do_not_overshoot() {
        for damping in [1.0, 2.0] {
            let solver = Solver::build(
                Curve::Spring {
                    period: 0.4,
                    damping,
                },
                vec![0.0],
                vec![0.0],
                vec![1.0],
            );
            for step in 0..400 {
                let (position, _, done) = solver.sample(f64::from(step) * 0.016);
                assert!(
                    position[0] <= 1.0 + 1e-9,
                    "damping {damping} overshoots at step {step}"
                );
                if done {
                    break;
                }
            }
        }
    }

    #[test]
    fn inertia_from_rest_approaches_target() {
        let solver = Solver::build(
            Curve::Inertia { drag: 5.0 },
            vec![0.0],
            vec![0.0],
            vec![1.0],
        );
        let (position, velocity, done) = solver.sample(5.0);
        assert!(done);
        assert!((position[0] - 1.0).abs() < 1e-3);
        assert_eq!(velocity, vec![0.0]);
    }

    #[test]
    fn inertia_with_seed_velocity_decays_in_its_own_direction() {
        let solver = Solver::build(
            Curve::Inertia { drag: 2.0 },
            vec![0.0],
            vec![-4.0],
            vec![1.0],
        );
        // v0/drag = −2: the natural stopping point ignores the target.
        let (position, _, done) = solver.sample(10.0);
        assert!(done);
        assert!((position[0] - (-2.0)).abs() < 1e-3);
    }

    #[test]
    fn validation_rejects_bad_configs() {
        assert_eq!(
            Transition::eased(Duration::ZERO, Easing::Linear).validate(1),
            Err(MotionError::NonPositiveDuration)
        );
        assert!(matches!(
            Transition::spring(0.0, 0.5).validate(1),
            Err(MotionError::InvalidPeriod { .. })
        ));
        assert!(matches!(
            Transition::spring(1.0, -1.0).validate(1),
            Err(MotionError::InvalidDamping { .. })
        ));
        assert!(matches!(
            Transition::inertia(f64::NAN).validate(1),
            Err(MotionError::InvalidDrag { .. })
        ));
        assert_eq!(
            Transition::linear(Duration::from_millis(100))
                .with_velocity(vec![1.0, 2.0])
                .validate(1),
            Err(MotionError::VelocityDimension {
                expected: 1,
                got: 2
            })
        );
        assert_eq!(Transition::instant().validate(3), Ok(()));
    }

    #[test]
    fn kinematics_max_speed() {
        let kinematics = Kinematics {
            position: vec![0.0, 0.0],
            velocity: vec![-3.0, 2.0],
        };
        assert_eq!(kinematics.max_speed(), 3.0);
        assert_eq!(Kinematics::at_rest(vec![1.0]).max_speed(), 0.0);
    }
}
