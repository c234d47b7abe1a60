//! Tick scheduler state machine and state hashing.
//!
//! The scheduler owns the run state and the fixed-interval accumulator. It
//! decides whether and how many ticks run; the engine runs them.

use crate::fixed::{Fixed64, Ticks};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted tick interval. Longer configured intervals are lowered
/// to this.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Scheduler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Initial state. Manual steps are allowed; `advance` does nothing.
    Stopped,
    /// The recurring tick fires every interval fed through `advance`.
    Running,
    /// Latched by an emergency stop until reset.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is halted by an emergency stop")]
    Halted,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("scheduler is not halted")]
    NotHalted,
}

/// The scheduler: run state, tick counter and time accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    state: RunState,
    /// Ticks executed since construction (manual steps included).
    tick: Ticks,
    /// Time fed through `advance` that has not yet produced a tick.
    accumulator: Duration,
    interval: Duration,
    max_ticks_per_advance: u32,
}

impl Scheduler {
    /// Create a stopped scheduler. The interval is clamped to
    /// [1 ms, [`MAX_TICK_INTERVAL`]] and a zero catch-up cap is raised to 1.
    pub fn new(interval: Duration, max_ticks_per_advance: u32) -> Self {
        if interval > MAX_TICK_INTERVAL {
            tracing::debug!(?interval, "tick interval lowered to maximum");
        }
        Self {
            state: RunState::Stopped,
            tick: 0,
            accumulator: Duration::ZERO,
            interval: interval.clamp(Duration::from_millis(1), MAX_TICK_INTERVAL),
            max_ticks_per_advance: max_ticks_per_advance.max(1),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn tick(&self) -> Ticks {
        self.tick
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Length of one tick in seconds, as used for level integration.
    pub fn dt(&self) -> Fixed64 {
        Fixed64::saturating_from_num(self.interval.as_millis()) / Fixed64::from_num(1000)
    }

    /// Simulated time covered by executed ticks.
    pub fn elapsed(&self) -> Duration {
        self.interval
            .saturating_mul(u32::try_from(self.tick).unwrap_or(u32::MAX))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Stopped -> Running. Returns `false` when already running.
    pub fn start(&mut self) -> Result<bool, SchedulerError> {
        match self.state {
            RunState::Halted => Err(SchedulerError::Halted),
            RunState::Running => Ok(false),
            RunState::Stopped => {
                self.state = RunState::Running;
                self.accumulator = Duration::ZERO;
                tracing::info!(tick = self.tick, "scheduler started");
                Ok(true)
            }
        }
    }

    /// Running -> Stopped. Returns `false` when already stopped.
    pub fn stop(&mut self) -> Result<bool, SchedulerError> {
        match self.state {
            RunState::Halted => Err(SchedulerError::Halted),
            RunState::Stopped => Ok(false),
            RunState::Running => {
                self.state = RunState::Stopped;
                self.accumulator = Duration::ZERO;
                tracing::info!(tick = self.tick, "scheduler stopped");
                Ok(true)
            }
        }
    }

    /// Running -> Halted.
    pub fn emergency_stop(&mut self) -> Result<(), SchedulerError> {
        if self.state != RunState::Running {
            return Err(SchedulerError::NotRunning);
        }
        self.state = RunState::Halted;
        self.accumulator = Duration::ZERO;
        tracing::info!(tick = self.tick, "emergency stop latched");
        Ok(())
    }

    /// Halted -> Stopped.
    pub fn reset_emergency_stop(&mut self) -> Result<(), SchedulerError> {
        if self.state != RunState::Halted {
            return Err(SchedulerError::NotHalted);
        }
        self.state = RunState::Stopped;
        tracing::info!(tick = self.tick, "emergency stop reset");
        Ok(())
    }

    /// Whether a manual step may run now.
    pub fn check_step(&self) -> Result<(), SchedulerError> {
        match self.state {
            RunState::Halted => Err(SchedulerError::Halted),
            RunState::Stopped | RunState::Running => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Feed elapsed wall time and return how many ticks are due.
    ///
    /// Does nothing unless running. At most `max_ticks_per_advance` ticks
    /// are returned; whole intervals beyond the cap are discarded and only
    /// the sub-interval remainder is carried.
    pub fn accumulate(&mut self, elapsed: Duration) -> u32 {
        if self.state != RunState::Running {
            return 0;
        }
        self.accumulator = self.accumulator.saturating_add(elapsed);
        let due = self.accumulator.as_nanos() / self.interval.as_nanos();
        let run = due.min(self.max_ticks_per_advance as u128) as u32;

        let remainder = self.accumulator.as_nanos() % self.interval.as_nanos();
        if due > run as u128 {
            tracing::debug!(due = due as u64, run, "tick catch-up capped");
            self.accumulator = Duration::from_nanos(remainder as u64);
        } else {
            self.accumulator = self.accumulator.saturating_sub(self.interval * run);
        }
        run
    }

    /// Count one executed tick.
    pub fn record_tick(&mut self) {
        self.tick += 1;
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// A simple deterministic hash of engine readings for determinism checks.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write(&[v as u8]);
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> Scheduler {
        Scheduler::new(Duration::from_millis(200), 8)
    }

    #[test]
    fn starts_stopped_at_tick_zero() {
        let s = sched();
        assert_eq!(s.state(), RunState::Stopped);
        assert_eq!(s.tick(), 0);
        assert_eq!(s.elapsed(), Duration::ZERO);
    }

    #[test]
    fn start_stop_cycle() {
        let mut s = sched();
        assert_eq!(s.start(), Ok(true));
        assert_eq!(s.start(), Ok(false));
        assert_eq!(s.stop(), Ok(true));
        assert_eq!(s.stop(), Ok(false));
        assert_eq!(s.state(), RunState::Stopped);
    }

    #[test]
    fn emergency_stop_only_from_running() {
        let mut s = sched();
        assert_eq!(s.emergency_stop(), Err(SchedulerError::NotRunning));
        s.start().unwrap();
        s.emergency_stop().unwrap();
        assert_eq!(s.state(), RunState::Halted);

        assert_eq!(s.start(), Err(SchedulerError::Halted));
        assert_eq!(s.stop(), Err(SchedulerError::Halted));
        assert_eq!(s.check_step(), Err(SchedulerError::Halted));

        s.reset_emergency_stop().unwrap();
        assert_eq!(s.state(), RunState::Stopped);
        assert_eq!(s.reset_emergency_stop(), Err(SchedulerError::NotHalted));
    }

    #[test]
    fn accumulate_only_while_running() {
        let mut s = sched();
        assert_eq!(s.accumulate(Duration::from_secs(1)), 0);
        s.start().unwrap();
        assert_eq!(s.accumulate(Duration::from_millis(150)), 0);
        assert_eq!(s.accumulate(Duration::from_millis(150)), 1);
        // 100 ms carried
        assert_eq!(s.accumulate(Duration::from_millis(300)), 2);
    }

    #[test]
    fn accumulate_caps_catch_up() {
        let mut s = sched();
        s.start().unwrap();
        assert_eq!(s.accumulate(Duration::from_millis(200 * 20 + 50)), 8);
        // Excess whole intervals were dropped; only 50 ms remain.
        assert_eq!(s.accumulate(Duration::from_millis(149)), 0);
        assert_eq!(s.accumulate(Duration::from_millis(1)), 1);
    }

    #[test]
    fn stop_clears_accumulator() {
        let mut s = sched();
        s.start().unwrap();
        s.accumulate(Duration::from_millis(190));
        s.stop().unwrap();
        s.start().unwrap();
        assert_eq!(s.accumulate(Duration::from_millis(20)), 0);
    }

    #[test]
    fn dt_and_elapsed_follow_interval() {
        let mut s = sched();
        assert!((s.dt() - Fixed64::from_num(0.2)).abs() < Fixed64::from_num(1e-6));
        s.record_tick();
        s.record_tick();
        assert_eq!(s.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn zero_interval_is_raised() {
        let s = Scheduler::new(Duration::ZERO, 0);
        assert_eq!(s.interval(), Duration::from_millis(1));
    }

    #[test]
    fn oversized_interval_is_capped() {
        let s = Scheduler::new(Duration::from_millis(3_000_000_000), 8);
        assert_eq!(s.interval(), MAX_TICK_INTERVAL);
        assert_eq!(s.dt(), Fixed64::from_num(3600));
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_fixed64(Fixed64::from_num(7));

        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_fixed64(Fixed64::from_num(7));

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u64(1);
        h1.write_u64(2);

        let mut h2 = StateHash::new();
        h2.write_u64(2);
        h2.write_u64(1);

        assert_ne!(h1.finish(), h2.finish());
    }
}
