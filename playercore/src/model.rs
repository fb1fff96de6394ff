use std::fmt;

use uuid::Uuid;

use crate::errors::PlaybackError;

/// Identity of one mounted player instance, used to tag events and logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new() -> Self {
        PlayerId(Uuid::new_v4().to_string())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    NativeFile,
    EmbeddedYouTube,
    EmbeddedVimeo,
}

impl MediaKind {
    /// The embed technology backing this kind, if any.
    pub fn technology(&self) -> Option<EmbedTechnology> {
        match self {
            MediaKind::NativeFile => None,
            MediaKind::EmbeddedYouTube => Some(EmbedTechnology::YouTube),
            MediaKind::EmbeddedVimeo => Some(EmbedTechnology::Vimeo),
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.technology().is_some()
    }
}

/// Third-party embed API family. One script bootstrap exists per technology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EmbedTechnology {
    YouTube,
    Vimeo,
}

impl EmbedTechnology {
    /// Key used in configuration (`embed.<name>.script_url`) and logs.
    pub fn name(&self) -> &'static str {
        match self {
            EmbedTechnology::YouTube => "youtube",
            EmbedTechnology::Vimeo => "vimeo",
        }
    }

    pub fn default_script_url(&self) -> &'static str {
        match self {
            EmbedTechnology::YouTube => "https://www.youtube.com/iframe_api",
            EmbedTechnology::Vimeo => "https://player.vimeo.com/api/player.js",
        }
    }

    /// Full-scale value of the embed API's volume setter.
    ///
    /// The YouTube IFrame API takes an integer in 0..=100, Vimeo a float in 0..=1.
    pub fn volume_scale(&self) -> f64 {
        match self {
            EmbedTechnology::YouTube => 100.0,
            EmbedTechnology::Vimeo => 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Errored,
}

impl PlaybackStatus {
    pub const ALL: [PlaybackStatus; 7] = [
        PlaybackStatus::Idle,
        PlaybackStatus::Loading,
        PlaybackStatus::Ready,
        PlaybackStatus::Playing,
        PlaybackStatus::Paused,
        PlaybackStatus::Ended,
        PlaybackStatus::Errored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Ready => "ready",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Ended => "ended",
            PlaybackStatus::Errored => "errored",
        }
    }

    /// Ready or beyond, with a live backend.
    pub fn has_backend(&self) -> bool {
        matches!(
            self,
            PlaybackStatus::Ready
                | PlaybackStatus::Playing
                | PlaybackStatus::Paused
                | PlaybackStatus::Ended
        )
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable playback state, owned by the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub position_seconds: f64,
    /// 0 until the backend reports metadata.
    pub duration_seconds: f64,
    /// In [0, 1].
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub last_error: Option<PlaybackError>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            last_error: None,
        }
    }
}

impl PlaybackState {
    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            status: self.status,
            position_seconds: self.position_seconds,
            duration_seconds: self.duration_seconds,
        }
    }

    pub fn sample(&self) -> ProgressSample {
        ProgressSample::new(self.position_seconds, self.duration_seconds)
    }
}

/// One position observation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSample {
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub fraction_complete: f64,
}

impl ProgressSample {
    pub fn new(position_seconds: f64, duration_seconds: f64) -> Self {
        let fraction_complete = if duration_seconds > 0.0 {
            (position_seconds / duration_seconds).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            position_seconds,
            duration_seconds,
            fraction_complete,
        }
    }
}

/// When a session counts as watched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionPolicy {
    threshold_fraction: f64,
}

impl CompletionPolicy {
    pub const DEFAULT_THRESHOLD: f64 = 0.95;

    pub fn new(threshold_fraction: f64) -> Result<Self, PlaybackError> {
        if !(threshold_fraction > 0.0 && threshold_fraction <= 1.0) {
            return Err(PlaybackError::InvalidArgument(format!(
                "completion threshold {threshold_fraction} is outside (0, 1]"
            )));
        }
        Ok(Self { threshold_fraction })
    }

    pub fn threshold_fraction(&self) -> f64 {
        self.threshold_fraction
    }

    pub fn is_complete(&self, sample: &ProgressSample) -> bool {
        sample.duration_seconds > 0.0 && sample.fraction_complete >= self.threshold_fraction
    }
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            threshold_fraction: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// User-level command, as received from the control surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek(f64),
    Skip(f64),
    SetVolume(f64),
    SetMuted(bool),
    SetPlaybackRate(f64),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Seek(_) => "seek",
            Command::Skip(_) => "skip",
            Command::SetVolume(_) => "set_volume",
            Command::SetMuted(_) => "set_muted",
            Command::SetPlaybackRate(_) => "set_playback_rate",
        }
    }

    /// Transport commands move the playhead or the play/pause state.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Command::Play | Command::Pause | Command::Seek(_) | Command::Skip(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    Applied,
    Rejected(PlaybackError),
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied)
    }
}

/// What every event carries for rendering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub position_seconds: f64,
    pub duration_seconds: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEventKind {
    StatusChanged {
        from: PlaybackStatus,
        to: PlaybackStatus,
    },
    PositionChanged,
    VolumeChanged {
        volume: f64,
        muted: bool,
    },
    RateChanged {
        rate: f64,
    },
    Completed,
    /// Warning-level: the command was a no-op.
    CommandRejected {
        command: Command,
        error: PlaybackError,
    },
    /// Transient: a later user-initiated `play()` may succeed.
    PlaybackRejected(PlaybackError),
    Errored(PlaybackError),
    ProgressWriteFailed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackEvent {
    pub player: PlayerId,
    pub session: u64,
    pub snapshot: PlaybackSnapshot,
    pub kind: PlaybackEventKind,
}
