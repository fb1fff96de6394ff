//! Capability traits every playback backend implements.
//!
//! Commands are best-effort: a backend that cannot honour one (rate control
//! on some embeds) performs a documented no-op and advertises the gap through
//! [`BackendCapabilities`] instead of failing.

use crate::backend::SignalSink;
use crate::errors::PlaybackError;
use crate::source::ResolvedSource;

/// Coarse state reported by a backend, independent of technology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendState {
    Playing,
    Paused,
    Ended,
    Buffering,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub rate_control: bool,
    pub volume_control: bool,
    /// The backend pushes position updates; no polling needed.
    pub pushes_position: bool,
}

/// Play / pause / seek.
pub trait TransportControl {
    /// Starts or resumes playback.
    ///
    /// Fails with [`PlaybackError::PlaybackRejected`] when the runtime refuses
    /// (autoplay policy); that failure is recoverable.
    fn play(&mut self) -> Result<(), PlaybackError>;

    fn pause(&mut self);

    fn seek_to(&mut self, seconds: f64);
}

/// Volume in [0, 1] and mute.
pub trait VolumeControl {
    fn set_volume(&mut self, volume: f64);

    fn set_muted(&mut self, muted: bool);
}

pub trait RateControl {
    /// No-op on backends without `rate_control`.
    fn set_rate(&mut self, rate: f64);
}

/// Position and state queries; callable at any time after load without failing.
pub trait PlaybackProbe {
    fn position(&self) -> f64;

    /// 0 while unknown.
    fn duration(&self) -> f64;

    fn state(&self) -> BackendState;
}

/// Uniform contract over a concrete playback technology.
pub trait MediaBackendAdapter: TransportControl + VolumeControl + RateControl + PlaybackProbe {
    /// Registers the single event handler, replacing any previous one.
    fn on_event(&mut self, sink: SignalSink);

    /// Starts loading `source`.
    ///
    /// An `Err` is an immediate rejection. Otherwise the outcome arrives
    /// later through the registered sink as `MetadataLoaded` or `LoadFailed`.
    fn load(&mut self, source: &ResolvedSource) -> Result<(), PlaybackError>;

    fn capabilities(&self) -> BackendCapabilities;

    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Releases every resource. Idempotent.
    fn dispose(&mut self);
}
