// File: ./src/scheduler/machine.rs
//! Check-in state machine, free of IO and timers.
//!
//! ```text
//! Idle ──request──▶ Running ──Succeeded/Failed──▶ Idle
//!                      │
//!                      └──Unavailable──▶ Backoff ──retry──▶ Running
//! any ──stop──▶ Stopped
//! ```
//! A request arriving while Running or in Backoff is remembered (at most
//! once) and served right after the cycle settles successfully.
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Running,
    Backoff,
    Stopped,
}

/// How a check-in ended, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Provider could not be reached: retry with backoff.
    Unavailable,
    /// Failed for a reason retrying will not fix.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// `base * 2^(failures - 1)`, capped at `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    state: SyncState,
    rerun: bool,
    consecutive_failures: u32,
    interval: Duration,
    backoff: Backoff,
}

impl SyncMachine {
    pub fn new(interval: Duration, backoff: Backoff) -> Self {
        Self {
            state: SyncState::Idle,
            rerun: false,
            consecutive_failures: 0,
            interval,
            backoff,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn rerun_pending(&self) -> bool {
        self.rerun
    }

    /// A timer tick or manual trigger. Returns true when a check-in should
    /// start now; otherwise the request is coalesced (or ignored once stopped).
    pub fn request(&mut self) -> bool {
        match self.state {
            SyncState::Idle => {
                self.state = SyncState::Running;
                true
            }
            SyncState::Running | SyncState::Backoff => {
                self.rerun = true;
                false
            }
            SyncState::Stopped => false,
        }
    }

    /// The backoff delay elapsed. The retry also serves any coalesced request.
    pub fn retry(&mut self) -> bool {
        if self.state != SyncState::Backoff {
            return false;
        }
        self.state = SyncState::Running;
        self.rerun = false;
        true
    }

    /// Ends the running cycle and returns how long to wait before the next
    /// timer-driven step.
    pub fn settle(&mut self, outcome: Outcome) -> Duration {
        if self.state != SyncState::Running {
            return self.interval;
        }
        match outcome {
            Outcome::Unavailable => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.state = SyncState::Backoff;
                self.backoff.delay(self.consecutive_failures)
            }
            Outcome::Succeeded | Outcome::Failed => {
                if outcome == Outcome::Succeeded {
                    self.consecutive_failures = 0;
                }
                self.state = SyncState::Idle;
                if std::mem::take(&mut self.rerun) {
                    Duration::ZERO
                } else {
                    self.interval
                }
            }
        }
    }

    pub fn stop(&mut self) {
        self.state = SyncState::Stopped;
        self.rerun = false;
    }
}
