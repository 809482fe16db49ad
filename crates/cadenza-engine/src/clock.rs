#![forbid(unsafe_code)]

//! Frame delta measurement for external drivers.

use web_time::{Duration, Instant};

use crate::engine::EngineConfig;

/// Converts successive driver callbacks into clamped frame deltas.
///
/// The first tick after construction or [`reset`](FrameClock::reset) reports
/// the nominal frame interval; afterwards the measured delta is used, capped
/// at the configured maximum so a suspended driver cannot produce one giant
/// animation jump.
#[derive(Debug)]
pub struct FrameClock {
    last: Option<Instant>,
    nominal: Duration,
    max_delta: Duration,
}

impl FrameClock {
    /// Create a clock from the engine configuration.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            last: None,
            nominal: config.nominal_frame,
            max_delta: config.max_frame_delta,
        }
    }

    /// Record a driver callback and return the frame delta to step with.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let dt = match self.last {
            Some(previous) => (now - previous).min(self.max_delta),
            None => self.nominal,
        };
        self.last = Some(now);
        dt
    }

    /// Forget the previous callback time. Call when the driver resumes from
    /// idle so the gap does not count as a frame delta.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
