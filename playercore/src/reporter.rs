//! Throttled progress persistence.
//!
//! The reporter sits between the controller's position stream and the
//! host's persistence layer ([`ProgressSink`]). It guarantees:
//!
//! - at most one regular write per write interval (the first sample of a
//!   session is written immediately);
//! - written positions never decrease within a session, and an unchanged
//!   position is never written twice;
//! - the completion write (`completed: true`) happens at most once, after
//!   which the reporter is closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::model::ProgressSample;

/// One outbound progress write.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub position_seconds: f64,
    pub fraction_complete: f64,
    pub completed: bool,
    pub timestamp: DateTime<Utc>,
}

/// Persistence collaborator. Failures are reported, never retried here.
pub trait ProgressSink: Send + Sync {
    fn write(&self, update: &ProgressUpdate) -> Result<()>;
}

/// Sink forwarding updates to a persistence worker over a channel.
#[derive(Clone, Debug)]
pub struct ChannelProgressSink {
    tx: Sender<ProgressUpdate>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, Receiver<ProgressUpdate>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn write(&self, update: &ProgressUpdate) -> Result<()> {
        self.tx
            .send(update.clone())
            .map_err(|_| anyhow!("progress receiver disconnected"))
    }
}

pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    clock: Arc<dyn Clock>,
    write_interval: Duration,
    last_write_at: Option<Instant>,
    last_written_position: Option<f64>,
    /// Furthest position seen so far; writes never go below it.
    high_water: Option<ProgressSample>,
    pending: Option<ProgressSample>,
    completed: bool,
    closed: bool,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, clock: Arc<dyn Clock>, write_interval: Duration) -> Self {
        Self {
            sink,
            clock,
            write_interval,
            last_write_at: None,
            last_written_position: None,
            high_water: None,
            pending: None,
            completed: false,
            closed: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records a sample and writes it if the throttle window allows.
    ///
    /// Samples behind the furthest position already seen are dropped.
    pub fn report(&mut self, sample: ProgressSample) -> Result<Option<ProgressUpdate>> {
        if self.closed || !sample.position_seconds.is_finite() {
            return Ok(None);
        }

        let advanced = self
            .high_water
            .is_none_or(|hw| sample.position_seconds > hw.position_seconds);
        if advanced {
            self.high_water = Some(sample);
            self.pending = Some(sample);
        }

        let now = self.clock.now();
        let window_open = self
            .last_write_at
            .is_none_or(|at| now.duration_since(at) >= self.write_interval);
        match self.pending {
            Some(pending) if window_open => self.write(pending, false, now),
            _ => Ok(None),
        }
    }

    /// Writes the completion record. Only the first call writes; the
    /// reporter is closed afterwards even if the write fails.
    pub fn complete(&mut self, sample: ProgressSample) -> Result<Option<ProgressUpdate>> {
        if self.completed {
            return Ok(None);
        }
        self.completed = true;
        self.closed = true;

        let mut position = match self.high_water {
            Some(hw) if hw.position_seconds > sample.position_seconds => hw.position_seconds,
            _ => sample.position_seconds,
        };
        // the media may have shrunk since the high-water sample
        if sample.duration_seconds > 0.0 {
            position = position.min(sample.duration_seconds);
        }
        let furthest = ProgressSample::new(position, sample.duration_seconds);
        info!(
            position = furthest.position_seconds,
            fraction = furthest.fraction_complete,
            "Session completed"
        );
        let now = self.clock.now();
        self.write(furthest, true, now)
    }

    /// Writes the latest unwritten sample, ignoring the throttle.
    pub fn flush(&mut self) -> Result<Option<ProgressUpdate>> {
        if self.closed {
            return Ok(None);
        }
        match self.pending {
            Some(pending) => {
                let now = self.clock.now();
                self.write(pending, false, now)
            }
            None => Ok(None),
        }
    }

    /// Stops accepting samples. Unwritten samples are discarded.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending = None;
    }

    fn write(
        &mut self,
        sample: ProgressSample,
        completed: bool,
        now: Instant,
    ) -> Result<Option<ProgressUpdate>> {
        if !completed && self.last_written_position == Some(sample.position_seconds) {
            self.pending = None;
            return Ok(None);
        }

        let update = ProgressUpdate {
            position_seconds: sample.position_seconds,
            fraction_complete: sample.fraction_complete,
            completed,
            timestamp: Utc::now(),
        };

        // a failed write still consumes the window
        self.last_write_at = Some(now);
        self.sink.write(&update).with_context(|| {
            format!(
                "Failed to write progress at {:.1}s (completed: {completed})",
                sample.position_seconds
            )
        })?;

        debug!(
            position = update.position_seconds,
            fraction = update.fraction_complete,
            completed,
            "Progress written"
        );
        self.last_written_position = Some(sample.position_seconds);
        self.pending = None;
        Ok(Some(update))
    }
}
