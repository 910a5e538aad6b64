//! Per-game dual countdown clock.
//!
//! Remaining time for the running side is never stored as a live-decrementing
//! counter; it's computed lazily from `running_since` against wall-clock
//! `Instant::now()` whenever `snapshot()` or `poll_flag()` is called. This
//! keeps the debit exact to the millisecond no matter how often (or rarely)
//! the session actor's ticker wakes up.

use std::time::{Duration, Instant};

use chess_logic_shared::Side;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub white_remaining_ms: u64,
    pub black_remaining_ms: u64,
    pub running_side: Side,
}

pub struct Clock {
    white_remaining: Duration,
    black_remaining: Duration,
    running_side: Option<Side>,
    running_since: Instant,
}

impl Clock {
    /// White starts running immediately, at the pairing instant.
    pub fn new(time_control_minutes: u32, now: Instant) -> Self {
        let budget = Duration::from_secs(u64::from(time_control_minutes) * 60);
        Self {
            white_remaining: budget,
            black_remaining: budget,
            running_side: Some(Side::White),
            running_since: now,
        }
    }

    fn live_remaining(&self, side: Side, now: Instant) -> Duration {
        let base = match side {
            Side::White => self.white_remaining,
            Side::Black => self.black_remaining,
        };
        if self.running_side == Some(side) {
            base.saturating_sub(now.saturating_duration_since(self.running_since))
        } else {
            base
        }
    }

    pub fn snapshot(&self, now: Instant) -> ClockSnapshot {
        ClockSnapshot {
            white_remaining_ms: self.live_remaining(Side::White, now).as_millis() as u64,
            black_remaining_ms: self.live_remaining(Side::Black, now).as_millis() as u64,
            running_side: self.running_side.unwrap_or(Side::White),
        }
    }

    /// Stops the currently running side, debits its elapsed time, and starts
    /// the other side. No-op once the clock has stopped (post flag-fall).
    pub fn switch(&mut self, now: Instant) {
        let Some(running) = self.running_side else {
            return;
        };
        let elapsed = now.saturating_duration_since(self.running_since);
        match running {
            Side::White => self.white_remaining = self.white_remaining.saturating_sub(elapsed),
            Side::Black => self.black_remaining = self.black_remaining.saturating_sub(elapsed),
        }
        self.running_side = Some(running.opposite());
        self.running_since = now;
    }

    /// Idempotent: freezes the clock so further `switch`/`poll_flag` calls
    /// are no-ops.
    pub fn stop(&mut self, now: Instant) {
        let Some(running) = self.running_side else {
            return;
        };
        let elapsed = now.saturating_duration_since(self.running_since);
        match running {
            Side::White => self.white_remaining = self.white_remaining.saturating_sub(elapsed),
            Side::Black => self.black_remaining = self.black_remaining.saturating_sub(elapsed),
        }
        self.running_side = None;
    }

    /// Returns the losing side exactly once, the first time its live
    /// remaining reaches zero, and stops the clock in the same call. Returns
    /// `None` on every call before or after that moment.
    pub fn poll_flag(&mut self, now: Instant) -> Option<Side> {
        let running = self.running_side?;
        if self.live_remaining(running, now).is_zero() {
            self.stop(now);
            Some(running)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_runs_from_construction() {
        let now = Instant::now();
        let clock = Clock::new(30, now);
        let snap = clock.snapshot(now);
        assert_eq!(snap.running_side, Side::White);
        assert_eq!(snap.white_remaining_ms, 30 * 60 * 1000);
        assert_eq!(snap.black_remaining_ms, 30 * 60 * 1000);
    }

    #[test]
    fn snapshot_debits_the_running_side_without_mutating() {
        let now = Instant::now();
        let clock = Clock::new(1, now);
        let later = now + Duration::from_secs(10);
        let snap = clock.snapshot(later);
        assert_eq!(snap.white_remaining_ms, 50 * 1000);
        // Calling snapshot again with the same instant is stable: no mutation occurred.
        assert_eq!(clock.snapshot(later).white_remaining_ms, 50 * 1000);
    }

    #[test]
    fn switch_debits_and_flips_running_side() {
        let now = Instant::now();
        let mut clock = Clock::new(1, now);
        let after_five = now + Duration::from_secs(5);
        clock.switch(after_five);
        let snap = clock.snapshot(after_five);
        assert_eq!(snap.running_side, Side::Black);
        assert_eq!(snap.white_remaining_ms, 55 * 1000);
        assert_eq!(snap.black_remaining_ms, 60 * 1000);
    }

    #[test]
    fn conservation_of_total_time_budget() {
        let now = Instant::now();
        let mut clock = Clock::new(1, now);
        let t1 = now + Duration::from_secs(5);
        clock.switch(t1);
        let t2 = t1 + Duration::from_secs(7);
        let snap = clock.snapshot(t2);
        let elapsed_total = t2.saturating_duration_since(now).as_millis() as u64;
        let spent = 120 * 1000 - (snap.white_remaining_ms + snap.black_remaining_ms);
        assert!(spent.abs_diff(elapsed_total) <= 5, "spent={spent} elapsed={elapsed_total}");
    }

    #[test]
    fn flag_fall_fires_exactly_once() {
        let now = Instant::now();
        let mut clock = Clock::new(1, now);
        let flagged_at = now + Duration::from_secs(61);
        assert_eq!(clock.poll_flag(flagged_at), Some(Side::White));
        assert_eq!(clock.poll_flag(flagged_at), None);
        assert_eq!(clock.poll_flag(flagged_at + Duration::from_secs(30)), None);
    }

    #[test]
    fn stop_is_idempotent() {
        let now = Instant::now();
        let mut clock = Clock::new(1, now);
        clock.stop(now + Duration::from_secs(3));
        let snap_once = clock.snapshot(now + Duration::from_secs(100));
        clock.stop(now + Duration::from_secs(200));
        let snap_twice = clock.snapshot(now + Duration::from_secs(300));
        assert_eq!(snap_once, snap_twice);
    }
}
