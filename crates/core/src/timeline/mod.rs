use std::{
    fmt,
    thread,
    time::{Duration, Instant},
};

use crate::{MusicStreamError, Result};

/// Paces the frame-driven loop.
///
/// Each [`FrameClock::tick`] sleeps until the next frame boundary and
/// reports how much time passed since the previous tick. A clock that falls
/// behind skips the missed frames instead of bursting to catch up.
pub struct FrameClock {
    interval: Duration,
    started: Instant,
    last_tick: Instant,
    deadline: Instant,
    frames: u64,
}

impl FrameClock {
    /// Paces frames at `frame_rate` per second.
    pub fn new(frame_rate: u32) -> Result<Self> {
        if frame_rate == 0 {
            return Err(MusicStreamError::InvalidInput(
                "frame rate must be greater than zero",
            ));
        }
        let interval = Duration::from_secs_f64(1.0 / frame_rate as f64);
        let now = Instant::now();
        Ok(Self {
            interval,
            started: now,
            last_tick: now,
            deadline: now + interval,
            frames: 0,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the next frame is due and returns the elapsed delta.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        if let Some(wait) = self.deadline.checked_duration_since(now) {
            thread::sleep(wait);
        }
        self.advance(Instant::now())
    }

    /// Frames ticked so far, skipped ones excluded.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> Duration {
        self.last_tick.duration_since(self.started)
    }

    /// Restarts the clock from now.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.last_tick = now;
        self.deadline = now + self.interval;
        self.frames = 0;
    }

    fn advance(&mut self, now: Instant) -> Duration {
        let delta = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.frames += 1;
        self.deadline += self.interval;
        if self.deadline <= now {
            let behind = now.duration_since(self.deadline);
            tracing::trace!(?behind, "frame clock fell behind, skipping frames");
            self.deadline = now + self.interval;
        }
        delta
    }
}

impl fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameClock")
            .field("interval", &self.interval)
            .field("frames", &self.frames)
            .finish()
    }
}
