//! Progress acquisition strategy and the poll timer.
//!
//! Native media elements push `timeupdate` events, so nothing needs to be
//! polled. Embedded players only answer queries, so the controller polls them
//! at a fixed interval, but only while the session is `Playing`.
//!
//! The timer is a plain deadline owned by the controller. It never runs on
//! its own; whoever drives the controller (`run_pending`) asks it whether it
//! is due. Cancelling it is therefore synchronous: once `cancel()` returns no
//! tick can fire.

use std::time::{Duration, Instant};

use crate::backend::{MediaBackend, MediaBackendAdapter};

/// How position updates are obtained from a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressStrategy {
    /// The backend pushes `TimeUpdate` signals.
    Push,

    /// The backend is queried at a fixed interval while playing.
    Polling { interval: Duration },
}

impl ProgressStrategy {
    /// Returns the strategy for a given backend.
    pub fn for_backend(backend: &MediaBackend, poll_interval: Duration) -> Self {
        if backend.capabilities().pushes_position {
            ProgressStrategy::Push
        } else {
            ProgressStrategy::Polling {
                interval: poll_interval,
            }
        }
    }

    /// Returns the polling interval, None for a push strategy.
    pub fn polling_interval(&self) -> Option<Duration> {
        match self {
            ProgressStrategy::Polling { interval } => Some(*interval),
            ProgressStrategy::Push => None,
        }
    }
}

/// Repeating deadline for position polling.
#[derive(Clone, Debug)]
pub struct PollTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    /// Schedules the first tick one interval after `now`. Re-arming an armed
    /// timer restarts the period.
    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Returns true when a tick is due at `now` and schedules the next one.
    ///
    /// Missed periods collapse into a single tick.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if due <= now => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
