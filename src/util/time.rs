//! Time utilities for match simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default tick rate of the simulation driver
pub const DEFAULT_SIMULATION_TPS: u32 = 30; // 30 ticks per second

/// Delta time for a tick at the given rate (in seconds)
pub fn tick_delta(tps: u32) -> f32 {
    1.0 / tps.max(1) as f32
}

/// Interval between ticks at the given rate
pub fn tick_duration(tps: u32) -> Duration {
    Duration::from_micros(1_000_000 / tps.max(1) as u64)
}

/// Simulated clock advanced only by the deltas handed to `update`.
///
/// Engines never read wall time for gameplay decisions; every timeout is an
/// elapsed-time comparison against this clock, so precision is bounded by the
/// driver's tick cadence and tests can advance time explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimClock {
    now: f32,
}

impl SimClock {
    pub fn new() -> Self {
        Self { now: 0.0 }
    }

    /// Current simulated time in seconds
    pub fn now(&self) -> f32 {
        self.now
    }

    /// Advance by `dt` seconds; negative or non-finite deltas are ignored
    pub fn advance(&mut self, dt: f32) -> f32 {
        if dt.is_finite() && dt > 0.0 {
            self.now += dt;
        }
        self.now
    }

    /// Seconds elapsed since `since`
    pub fn since(&self, since: f32) -> f32 {
        (self.now - since).max(0.0)
    }

    pub fn reset(&mut self) {
        self.now = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_ignores_bad_deltas() {
        let mut clock = SimClock::new();
        clock.advance(1.5);
        clock.advance(-3.0);
        clock.advance(f32::NAN);
        assert_eq!(clock.now(), 1.5);
        assert_eq!(clock.since(0.5), 1.0);
        assert_eq!(clock.since(10.0), 0.0);
    }

    #[test]
    fn test_tick_delta_guards_zero_rate() {
        assert_eq!(tick_delta(20), 0.05);
        assert_eq!(tick_delta(0), 1.0);
        assert_eq!(tick_duration(50), Duration::from_millis(20));
    }
}
