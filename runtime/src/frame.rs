//! Animation-frame scheduling.

use std::thread;
use std::time::{Duration, Instant};

use crate::{Error, Result, Timers};

/// Longest frame period a wall-clock source accepts.
pub const MAX_PERIOD: Duration = Duration::from_secs(3600);

/// Turns frame timestamps into per-frame deltas.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameClock {
    prev: Option<f64>,
}

impl FrameClock {
    /// Records a timestamp in milliseconds and returns the seconds elapsed
    /// since the previous one. The first tick only primes the clock.
    pub fn tick(&mut self, timestamp_ms: f64) -> Option<f64> {
        let delta = self.prev.map(|prev| (timestamp_ms - prev) * 0.001);
        self.prev = Some(timestamp_ms);
        delta
    }
}

/// Produces frame timestamps for the runtime loop.
pub trait FrameSource {
    /// Waits for the next frame, running `timers` that come due meanwhile.
    /// Returns the frame timestamp in milliseconds, or `None` to stop.
    fn next_frame(&mut self, timers: &mut dyn Timers) -> Option<f64>;
}

/// Wall-clock frames at a fixed rate.
pub struct Interval {
    period: Duration,
    origin: Instant,
    next: Instant,
    remaining: Option<u64>,
}

impl Interval {
    /// `fps` frames per second; `limit` caps the total number of frames.
    ///
    /// The rate must be positive and give a period of at most [`MAX_PERIOD`].
    pub fn new(fps: f64, limit: Option<u64>) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::FrameRate(format!("{fps} is not a positive number")));
        }
        let period = Duration::try_from_secs_f64(1.0 / fps)
            .ok()
            .filter(|period| *period <= MAX_PERIOD)
            .ok_or_else(|| Error::FrameRate(format!("{fps} frames per second is too slow")))?;
        let origin = Instant::now();
        Ok(Self {
            period,
            origin,
            next: origin,
            remaining: limit,
        })
    }
}

impl FrameSource for Interval {
    fn next_frame(&mut self, timers: &mut dyn Timers) -> Option<f64> {
        match &mut self.remaining {
            Some(0) => return None,
            Some(n) => *n -= 1,
            None => {}
        }

        loop {
            let now = Instant::now();
            match timers.deadline() {
                Some(deadline) if deadline <= now => {
                    timers.fire(now);
                    continue;
                }
                _ => {}
            }
            if now >= self.next {
                if self.period.is_zero() {
                    self.next = now;
                } else {
                    // Skip slots we overslept rather than bursting to catch up.
                    while self.next <= now {
                        match self.next.checked_add(self.period) {
                            Some(next) => self.next = next,
                            None => {
                                self.next = now;
                                break;
                            }
                        }
                    }
                }
                let elapsed = now.duration_since(self.origin);
                return Some(elapsed.as_secs_f64() * 1000.0);
            }
            let wake = timers
                .deadline()
                .map_or(self.next, |deadline| deadline.min(self.next));
            thread::sleep(wake.saturating_duration_since(now));
        }
    }
}
