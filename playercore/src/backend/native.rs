//! Direct media file backend.
//!
//! The host supplies a [`MediaElement`] (a video element, a decoder wrapper,
//! anything with the usual media-element surface). Element events are
//! translated into [`BackendSignal`]s by a [`MediaElementListener`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::backend::capabilities::{
    BackendCapabilities, BackendState, MediaBackendAdapter, PlaybackProbe, RateControl,
    TransportControl, VolumeControl,
};
use crate::backend::{BackendSignal, ProtectionPolicy, SignalSink};
use crate::errors::{LoadFailure, PlaybackError};
use crate::source::ResolvedSource;

/// Host media element.
///
/// Implementations forward to the real element; none of these calls may
/// block on the network.
pub trait MediaElement: Send {
    /// Points the element at `url` and starts fetching metadata.
    fn set_source(&mut self, url: &str) -> Result<(), String>;

    /// Installs (or with `None`, detaches) the single event listener.
    fn set_listener(&mut self, listener: Option<MediaElementListener>);

    /// Hides native controls and disables the context menu, download and
    /// picture-in-picture affordances the policy asks for.
    fn apply_protection(&mut self, policy: &ProtectionPolicy);

    /// Fails when the runtime refuses to start playback (autoplay policy).
    fn play(&mut self) -> Result<(), String>;

    fn pause(&mut self);

    fn set_current_time(&mut self, seconds: f64);

    fn current_time(&self) -> f64;

    /// NaN or 0 while unknown.
    fn duration(&self) -> f64;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn is_waiting(&self) -> bool;

    fn set_volume(&mut self, volume: f64);

    fn set_muted(&mut self, muted: bool);

    fn set_playback_rate(&mut self, rate: f64);

    /// Drops the source and frees decoder resources.
    fn release(&mut self);
}

/// Creates host media elements on demand.
pub trait MediaElementFactory: Send + Sync {
    fn create_element(&self) -> Result<Box<dyn MediaElement>, String>;
}

/// Events a media element can raise.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaElementEvent {
    LoadedMetadata { duration_seconds: f64 },
    DurationChange { duration_seconds: f64 },
    TimeUpdate { current_time: f64 },
    Play,
    Playing,
    Pause,
    Ended,
    Waiting,
    Error { code: u16, message: String },
}

/// Readable reason for a standard media error code.
pub fn media_error_reason(code: u16) -> &'static str {
    match code {
        1 => "playback aborted",
        2 => "network error while fetching media",
        3 => "media could not be decoded",
        4 => "media format or source not supported",
        _ => "unknown media error",
    }
}

fn known_duration(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

/// Translates element events into backend signals for one session.
#[derive(Clone, Debug)]
pub struct MediaElementListener {
    sink: SignalSink,
    metadata_seen: Arc<AtomicBool>,
}

impl MediaElementListener {
    pub fn new(sink: SignalSink) -> Self {
        Self {
            sink,
            metadata_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dispatch(&self, event: MediaElementEvent) {
        trace!(session = self.sink.session(), event = ?event, "Media element event");

        let signal = match event {
            MediaElementEvent::LoadedMetadata { duration_seconds } => {
                self.metadata_seen.store(true, Ordering::SeqCst);
                BackendSignal::MetadataLoaded {
                    duration_seconds: known_duration(duration_seconds),
                }
            }
            MediaElementEvent::DurationChange { duration_seconds } => {
                BackendSignal::DurationChanged {
                    duration_seconds: known_duration(duration_seconds),
                }
            }
            MediaElementEvent::TimeUpdate { current_time } => BackendSignal::TimeUpdate {
                position_seconds: current_time,
            },
            MediaElementEvent::Play | MediaElementEvent::Playing => BackendSignal::Started,
            MediaElementEvent::Pause => BackendSignal::Paused,
            MediaElementEvent::Ended => BackendSignal::Ended,
            MediaElementEvent::Waiting => BackendSignal::Buffering,
            MediaElementEvent::Error { code, message } => {
                let reason = if message.is_empty() {
                    media_error_reason(code).to_string()
                } else {
                    format!("{} ({message})", media_error_reason(code))
                };
                if self.metadata_seen.load(Ordering::SeqCst) {
                    BackendSignal::Fault(PlaybackError::Fault(reason))
                } else {
                    BackendSignal::LoadFailed(PlaybackError::BackendLoad(LoadFailure::MediaLoad(
                        reason,
                    )))
                }
            }
        };

        self.sink.emit(signal);
    }
}

/// Backend over a host media element.
pub struct NativeMediaBackend {
    element: Box<dyn MediaElement>,
    protection: ProtectionPolicy,
    listener: Option<MediaElementListener>,
    disposed: bool,
}

impl NativeMediaBackend {
    pub fn new(element: Box<dyn MediaElement>, protection: ProtectionPolicy) -> Self {
        Self {
            element,
            protection,
            listener: None,
            disposed: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl fmt::Debug for NativeMediaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMediaBackend")
            .field("protection", &self.protection)
            .field("listening", &self.listener.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl TransportControl for NativeMediaBackend {
    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.disposed {
            return Err(PlaybackError::BackendUnavailable(
                "media element released".to_string(),
            ));
        }
        self.element
            .play()
            .map_err(PlaybackError::PlaybackRejected)
    }

    fn pause(&mut self) {
        if !self.disposed {
            self.element.pause();
        }
    }

    fn seek_to(&mut self, seconds: f64) {
        if !self.disposed {
            self.element.set_current_time(seconds);
        }
    }
}

impl VolumeControl for NativeMediaBackend {
    fn set_volume(&mut self, volume: f64) {
        if !self.disposed {
            self.element.set_volume(volume.clamp(0.0, 1.0));
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if !self.disposed {
            self.element.set_muted(muted);
        }
    }
}

impl RateControl for NativeMediaBackend {
    fn set_rate(&mut self, rate: f64) {
        if !self.disposed {
            self.element.set_playback_rate(rate);
        }
    }
}

impl PlaybackProbe for NativeMediaBackend {
    fn position(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        let position = self.element.current_time();
        if position.is_finite() { position.max(0.0) } else { 0.0 }
    }

    fn duration(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        known_duration(self.element.duration())
    }

    fn state(&self) -> BackendState {
        if self.disposed || self.element.is_ended() {
            BackendState::Ended
        } else if self.element.is_waiting() {
            BackendState::Buffering
        } else if self.element.is_paused() {
            BackendState::Paused
        } else {
            BackendState::Playing
        }
    }
}

impl MediaBackendAdapter for NativeMediaBackend {
    fn on_event(&mut self, sink: SignalSink) {
        let listener = MediaElementListener::new(sink);
        self.element.set_listener(Some(listener.clone()));
        self.listener = Some(listener);
    }

    fn load(&mut self, source: &ResolvedSource) -> Result<(), PlaybackError> {
        if self.disposed {
            return Err(PlaybackError::BackendUnavailable(
                "media element released".to_string(),
            ));
        }
        self.element.apply_protection(&self.protection);
        self.element
            .set_source(source.locator())
            .map_err(|reason| PlaybackError::media_load(&reason))?;
        debug!(locator = source.locator(), "Native media source set");
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            rate_control: true,
            volume_control: true,
            pushes_position: true,
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.element.pause();
        self.element.set_listener(None);
        self.element.release();
        self.listener = None;
        self.disposed = true;
        debug!("Native media element released");
    }
}
