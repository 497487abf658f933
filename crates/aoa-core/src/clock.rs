//! Millisecond tick clock.
//!
//! Drives `UsbHost::poll` with the time elapsed since the previous poll and
//! stamps log lines with the session uptime.

use std::time::{Duration, Instant};

/// Wrapping difference between two tick readings.
pub fn delta_ms(start: u32, end: u32) -> u32 {
    end.wrapping_sub(start)
}

#[derive(Debug, Clone)]
pub struct TickClock {
    started: Instant,
    last_tick: u32,
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_tick: 0,
        }
    }

    /// Milliseconds since the clock was created, wrapping at `u32::MAX`.
    pub fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Time elapsed since the previous call.
    pub fn tick(&mut self) -> Duration {
        let now = self.now_ms();
        let elapsed = delta_ms(self.last_tick, now);
        self.last_tick = now;
        Duration::from_millis(u64::from(elapsed))
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_wraps() {
        assert_eq!(delta_ms(10, 25), 15);
        assert_eq!(delta_ms(u32::MAX - 4, 5), 10);
        assert_eq!(delta_ms(7, 7), 0);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut clock = TickClock::new();
        std::thread::sleep(Duration::from_millis(3));
        let first = clock.tick();
        assert!(first >= Duration::from_millis(3));
        let second = clock.tick();
        assert!(second < Duration::from_secs(1));
    }
}
