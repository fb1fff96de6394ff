//! Embedded third-party player backend (YouTube, Vimeo).
//!
//! Loading goes through the shared [`ScriptBootstrap`]: the player is only
//! created once its technology's API script is ready. The player is created
//! with every piece of native chrome suppressed, and its container is never
//! interactive, so all input reaches it through the controller.
//!
//! Embedded players do not push position updates; the controller polls
//! [`PlaybackProbe::position`] while playing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use url::Url;

use crate::backend::bootstrap::ScriptBootstrap;
use crate::backend::capabilities::{
    BackendCapabilities, BackendState, MediaBackendAdapter, PlaybackProbe, RateControl,
    TransportControl, VolumeControl,
};
use crate::backend::{BackendSignal, ProtectionPolicy, SignalSink};
use crate::errors::{LoadFailure, PlaybackError};
use crate::model::EmbedTechnology;
use crate::source::ResolvedSource;

/// Player state as reported by the embed API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedPlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl EmbedPlayerState {
    /// Maps the YouTube IFrame API `PlayerState` numbers.
    pub fn from_youtube_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(EmbedPlayerState::Unstarted),
            0 => Some(EmbedPlayerState::Ended),
            1 => Some(EmbedPlayerState::Playing),
            2 => Some(EmbedPlayerState::Paused),
            3 => Some(EmbedPlayerState::Buffering),
            5 => Some(EmbedPlayerState::Cued),
            _ => None,
        }
    }
}

impl From<EmbedPlayerState> for BackendState {
    fn from(state: EmbedPlayerState) -> Self {
        match state {
            EmbedPlayerState::Playing => BackendState::Playing,
            EmbedPlayerState::Ended => BackendState::Ended,
            EmbedPlayerState::Buffering => BackendState::Buffering,
            EmbedPlayerState::Paused | EmbedPlayerState::Unstarted | EmbedPlayerState::Cued => {
                BackendState::Paused
            }
        }
    }
}

/// Events raised by an embedded player.
#[derive(Clone, Debug, PartialEq)]
pub enum EmbedPlayerEvent {
    /// The player finished loading the video. Duration may still be 0.
    Ready { duration_seconds: f64 },
    StateChange(EmbedPlayerState),
    Error { code: i32, message: String },
}

/// Readable reason for a YouTube player error code.
pub fn youtube_error_reason(code: i32) -> &'static str {
    match code {
        2 => "invalid video identifier",
        5 => "the video cannot be played in the HTML5 player",
        100 => "video not found or private",
        101 | 150 => "the owner does not allow embedding",
        _ => "unknown player error",
    }
}

/// Translates embedded player events into backend signals for one session.
#[derive(Clone, Debug)]
pub struct EmbedEventSink {
    sink: SignalSink,
    technology: EmbedTechnology,
    ready_seen: Arc<AtomicBool>,
}

impl EmbedEventSink {
    pub fn new(sink: SignalSink, technology: EmbedTechnology) -> Self {
        Self {
            sink,
            technology,
            ready_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dispatch(&self, event: EmbedPlayerEvent) {
        let signal = match event {
            EmbedPlayerEvent::Ready { duration_seconds } => {
                self.ready_seen.store(true, Ordering::SeqCst);
                BackendSignal::MetadataLoaded {
                    duration_seconds: if duration_seconds.is_finite() && duration_seconds > 0.0 {
                        duration_seconds
                    } else {
                        0.0
                    },
                }
            }
            EmbedPlayerEvent::StateChange(state) => match state {
                EmbedPlayerState::Playing => BackendSignal::Started,
                EmbedPlayerState::Paused => BackendSignal::Paused,
                EmbedPlayerState::Ended => BackendSignal::Ended,
                EmbedPlayerState::Buffering => BackendSignal::Buffering,
                EmbedPlayerState::Unstarted | EmbedPlayerState::Cued => return,
            },
            EmbedPlayerEvent::Error { code, message } => {
                let message = match self.technology {
                    EmbedTechnology::YouTube => youtube_error_reason(code).to_string(),
                    EmbedTechnology::Vimeo if message.is_empty() => {
                        "unknown player error".to_string()
                    }
                    EmbedTechnology::Vimeo => message,
                };
                let failure = LoadFailure::EmbeddedPlayer { code, message };
                if self.ready_seen.load(Ordering::SeqCst) {
                    BackendSignal::Fault(PlaybackError::Fault(failure.to_string()))
                } else {
                    BackendSignal::LoadFailed(PlaybackError::BackendLoad(failure))
                }
            }
        };
        self.sink.emit(signal);
    }
}

/// Everything the host needs to create an embedded player.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbedPlayerSpec {
    pub technology: EmbedTechnology,
    pub video_id: String,
    /// Whether the container accepts pointer and keyboard input.
    pub interactive: bool,
    /// Player parameters, in the order they are passed to the embed API.
    pub parameters: Vec<(String, String)>,
}

impl EmbedPlayerSpec {
    pub fn new(technology: EmbedTechnology, video_id: &str, protection: &ProtectionPolicy) -> Self {
        let mut parameters = chrome_suppression_parameters(technology);
        if !protection.hide_native_controls {
            let controls_on = match technology {
                EmbedTechnology::YouTube => "1",
                EmbedTechnology::Vimeo => "true",
            };
            for (key, value) in parameters.iter_mut() {
                if key == "controls" {
                    *value = controls_on.to_string();
                }
            }
        }
        Self {
            technology,
            video_id: video_id.to_string(),
            interactive: protection.interactive_embed,
            parameters,
        }
    }

    /// Iframe URL carrying the player parameters.
    pub fn embed_url(&self) -> Result<Url, url::ParseError> {
        let base = match self.technology {
            EmbedTechnology::YouTube => {
                format!("https://www.youtube-nocookie.com/embed/{}", self.video_id)
            }
            EmbedTechnology::Vimeo => format!("https://player.vimeo.com/video/{}", self.video_id),
        };
        let mut url = Url::parse(&base)?;
        url.query_pairs_mut().extend_pairs(
            self.parameters
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
        Ok(url)
    }
}

/// Player parameters that hide every piece of the technology's own interface.
pub fn chrome_suppression_parameters(technology: EmbedTechnology) -> Vec<(String, String)> {
    let pairs: &[(&str, &str)] = match technology {
        EmbedTechnology::YouTube => &[
            ("controls", "0"),
            ("disablekb", "1"),
            ("fs", "0"),
            ("rel", "0"),
            ("modestbranding", "1"),
            ("iv_load_policy", "3"),
            ("playsinline", "1"),
            ("enablejsapi", "1"),
        ],
        EmbedTechnology::Vimeo => &[
            ("controls", "false"),
            ("keyboard", "false"),
            ("title", "false"),
            ("byline", "false"),
            ("portrait", "false"),
            ("pip", "false"),
            ("dnt", "true"),
        ],
    };
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A live embedded player created by the host.
pub trait EmbeddedPlayer: Send {
    fn play(&mut self);

    fn pause(&mut self);

    fn seek_to(&mut self, seconds: f64);

    /// Volume in the technology's own scale (see [`EmbedTechnology::volume_scale`]).
    fn set_volume(&mut self, volume: f64);

    fn set_muted(&mut self, muted: bool);

    fn set_playback_rate(&mut self, rate: f64);

    fn current_time(&self) -> f64;

    fn duration(&self) -> f64;

    fn player_state(&self) -> EmbedPlayerState;

    fn destroy(&mut self);
}

/// Creates embedded players once their API is loaded.
pub trait EmbedHost: Send + Sync {
    fn create_player(
        &self,
        spec: &EmbedPlayerSpec,
        events: EmbedEventSink,
    ) -> Result<Box<dyn EmbeddedPlayer>, String>;
}

#[derive(Default)]
struct EmbeddedInner {
    player: Option<Box<dyn EmbeddedPlayer>>,
    sink: Option<SignalSink>,
    disposed: bool,
}

/// Backend over a YouTube or Vimeo embedded player.
pub struct EmbeddedPlayerBackend {
    technology: EmbedTechnology,
    host: Arc<dyn EmbedHost>,
    bootstrap: Arc<ScriptBootstrap>,
    protection: ProtectionPolicy,
    inner: Arc<Mutex<EmbeddedInner>>,
}

impl EmbeddedPlayerBackend {
    pub fn new(
        technology: EmbedTechnology,
        host: Arc<dyn EmbedHost>,
        bootstrap: Arc<ScriptBootstrap>,
        protection: ProtectionPolicy,
    ) -> Self {
        Self {
            technology,
            host,
            bootstrap,
            protection,
            inner: Arc::new(Mutex::new(EmbeddedInner::default())),
        }
    }

    pub fn technology(&self) -> EmbedTechnology {
        self.technology
    }

    /// True once the host has created the player.
    pub fn has_player(&self) -> bool {
        self.inner
            .lock()
            .expect("Embedded player mutex poisoned")
            .player
            .is_some()
    }

    fn with_player<R>(&self, f: impl FnOnce(&mut dyn EmbeddedPlayer) -> R) -> Option<R> {
        let mut inner = self.inner.lock().expect("Embedded player mutex poisoned");
        if inner.disposed {
            return None;
        }
        let player = inner.player.as_mut()?;
        Some(f(&mut **player))
    }

    fn read_player<R>(&self, f: impl FnOnce(&dyn EmbeddedPlayer) -> R) -> Option<R> {
        let inner = self.inner.lock().expect("Embedded player mutex poisoned");
        if inner.disposed {
            return None;
        }
        let player = inner.player.as_ref()?;
        Some(f(&**player))
    }
}

impl fmt::Debug for EmbeddedPlayerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedPlayerBackend")
            .field("technology", &self.technology)
            .field("protection", &self.protection)
            .field("has_player", &self.has_player())
            .finish()
    }
}

impl TransportControl for EmbeddedPlayerBackend {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.with_player(|player| player.play()).ok_or_else(|| {
            PlaybackError::BackendUnavailable(format!(
                "{} player is not available",
                self.technology.name()
            ))
        })
    }

    fn pause(&mut self) {
        self.with_player(|player| player.pause());
    }

    fn seek_to(&mut self, seconds: f64) {
        self.with_player(|player| player.seek_to(seconds));
    }
}

impl VolumeControl for EmbeddedPlayerBackend {
    fn set_volume(&mut self, volume: f64) {
        let scaled = volume.clamp(0.0, 1.0) * self.technology.volume_scale();
        let scaled = match self.technology {
            EmbedTechnology::YouTube => scaled.round(),
            EmbedTechnology::Vimeo => scaled,
        };
        self.with_player(|player| player.set_volume(scaled));
    }

    fn set_muted(&mut self, muted: bool) {
        self.with_player(|player| player.set_muted(muted));
    }
}

impl RateControl for EmbeddedPlayerBackend {
    fn set_rate(&mut self, rate: f64) {
        if !self.capabilities().rate_control {
            debug!(
                technology = self.technology.name(),
                rate, "Rate control unsupported, ignoring"
            );
            return;
        }
        self.with_player(|player| player.set_playback_rate(rate));
    }
}

impl PlaybackProbe for EmbeddedPlayerBackend {
    fn position(&self) -> f64 {
        self.read_player(|player| player.current_time())
            .filter(|t| t.is_finite() && *t >= 0.0)
            .unwrap_or(0.0)
    }

    fn duration(&self) -> f64 {
        self.read_player(|player| player.duration())
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(0.0)
    }

    fn state(&self) -> BackendState {
        self.read_player(|player| player.player_state().into())
            .unwrap_or(BackendState::Paused)
    }
}

impl MediaBackendAdapter for EmbeddedPlayerBackend {
    fn on_event(&mut self, sink: SignalSink) {
        let mut inner = self.inner.lock().expect("Embedded player mutex poisoned");
        inner.sink = Some(sink);
    }

    fn load(&mut self, source: &ResolvedSource) -> Result<(), PlaybackError> {
        let sink = {
            let inner = self.inner.lock().expect("Embedded player mutex poisoned");
            if inner.disposed {
                return Err(PlaybackError::BackendUnavailable(format!(
                    "{} backend disposed",
                    self.technology.name()
                )));
            }
            inner.sink.clone().ok_or_else(|| {
                PlaybackError::Fault("load requested before an event handler was registered".into())
            })?
        };

        let spec = EmbedPlayerSpec::new(self.technology, source.locator(), &self.protection);
        let technology = self.technology;
        let host = Arc::clone(&self.host);
        let inner = Arc::clone(&self.inner);

        debug!(
            technology = technology.name(),
            video_id = spec.video_id.as_str(),
            "Waiting for embed API before creating player"
        );

        self.bootstrap.when_ready(
            technology,
            Box::new(move |result| {
                let mut inner = inner.lock().expect("Embedded player mutex poisoned");
                if inner.disposed {
                    debug!(
                        technology = technology.name(),
                        "Embed API resolved after dispose, not creating player"
                    );
                    return;
                }
                match result {
                    Err(reason) => {
                        sink.emit(BackendSignal::LoadFailed(PlaybackError::script_load(
                            &reason,
                        )));
                    }
                    Ok(()) => {
                        let events = EmbedEventSink::new(sink.clone(), technology);
                        match host.create_player(&spec, events) {
                            Ok(player) => inner.player = Some(player),
                            Err(reason) => {
                                warn!(
                                    technology = technology.name(),
                                    reason = reason.as_str(),
                                    "Embedded player creation failed"
                                );
                                sink.emit(BackendSignal::LoadFailed(PlaybackError::BackendLoad(
                                    LoadFailure::PlayerCreation(reason),
                                )));
                            }
                        }
                    }
                }
            }),
        );
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            rate_control: self.technology == EmbedTechnology::YouTube,
            volume_control: true,
            pushes_position: false,
        }
    }

    fn name(&self) -> &'static str {
        self.technology.name()
    }

    fn dispose(&mut self) {
        let mut inner = self.inner.lock().expect("Embedded player mutex poisoned");
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.sink = None;
        if let Some(mut player) = inner.player.take() {
            player.destroy();
        }
        debug!(technology = self.technology.name(), "Embedded player destroyed");
    }
}
