//! Monotonic millisecond clock shared by every thread of a run.

use std::time::Instant;

/// Millisecond timestamps relative to one shared epoch.
#[derive(Clone, Copy, Debug)]
pub struct RunClock {
    epoch: Instant,
}

impl RunClock {
    /// Start a clock whose epoch is now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch, with sub-millisecond precision.
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readings_are_monotonic() {
        let clock = RunClock::start();
        let first = clock.now_ms();
        thread::sleep(Duration::from_millis(2));
        let second = clock.now_ms();
        assert!(first >= 0.0);
        assert!(second >= first + 1.0);
    }
}
