//! The player's own controls.
//!
//! The embedded technologies' interfaces are never interactive, so every
//! user input goes through a [`ControlSurface`]: gestures and keys become
//! controller commands, and the event stream is projected into a
//! [`SurfaceView`] for rendering.

use playerconfig::Config;

use crate::controller::PlaybackController;
use crate::model::{
    Command, CommandOutcome, PlaybackEvent, PlaybackEventKind, PlaybackStatus, ProgressSample,
};
use crate::time_utils::{format_clock, format_remaining};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gesture {
    TogglePlay,
    SkipForward,
    SkipBack,
    /// Click on the progress bar, in [0, 1].
    SeekToFraction(f64),
    VolumeUp,
    VolumeDown,
    ToggleMute,
    /// Next allowed playback rate, wrapping to the slowest.
    CycleRate,
    Retry,
}

impl Gesture {
    /// Maps a keyboard key name (as reported by the host) to a gesture.
    pub fn from_key(key: &str) -> Option<Gesture> {
        match key {
            " " | "Space" | "k" | "K" => Some(Gesture::TogglePlay),
            "j" | "J" | "ArrowLeft" => Some(Gesture::SkipBack),
            "l" | "L" | "ArrowRight" => Some(Gesture::SkipForward),
            "ArrowUp" => Some(Gesture::VolumeUp),
            "ArrowDown" => Some(Gesture::VolumeDown),
            "m" | "M" => Some(Gesture::ToggleMute),
            _ => None,
        }
    }
}

/// What the controls render.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceView {
    pub status: PlaybackStatus,
    pub elapsed: String,
    pub remaining: String,
    pub progress_fraction: f64,
    pub transport_enabled: bool,
    pub show_retry: bool,
    pub volume: f64,
    pub muted: bool,
    pub rate: f64,
    /// Latest warning or error, cleared when a new session starts loading.
    pub message: Option<String>,
}

impl Default for SurfaceView {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            elapsed: format_clock(0.0),
            remaining: format_remaining(0.0, 0.0),
            progress_fraction: 0.0,
            transport_enabled: false,
            show_retry: false,
            volume: 1.0,
            muted: false,
            rate: 1.0,
            message: None,
        }
    }
}

impl SurfaceView {
    /// Folds one event into the view.
    pub fn apply_event(&mut self, event: &PlaybackEvent) {
        let snapshot = event.snapshot;
        self.status = snapshot.status;
        self.elapsed = format_clock(snapshot.position_seconds);
        self.remaining = format_remaining(snapshot.position_seconds, snapshot.duration_seconds);
        self.progress_fraction =
            ProgressSample::new(snapshot.position_seconds, snapshot.duration_seconds)
                .fraction_complete;
        self.transport_enabled = matches!(
            snapshot.status,
            PlaybackStatus::Ready | PlaybackStatus::Playing | PlaybackStatus::Paused
        );
        self.show_retry = snapshot.status == PlaybackStatus::Errored;

        match &event.kind {
            PlaybackEventKind::StatusChanged {
                to: PlaybackStatus::Loading,
                ..
            } => self.message = None,
            PlaybackEventKind::VolumeChanged { volume, muted } => {
                self.volume = *volume;
                self.muted = *muted;
            }
            PlaybackEventKind::RateChanged { rate } => self.rate = *rate,
            PlaybackEventKind::CommandRejected { error, .. } => {
                self.message = Some(error.to_string())
            }
            PlaybackEventKind::PlaybackRejected(error) | PlaybackEventKind::Errored(error) => {
                self.message = Some(error.to_string())
            }
            PlaybackEventKind::ProgressWriteFailed(reason) => {
                self.message = Some(format!("Progress not saved: {reason}"))
            }
            _ => {}
        }
    }
}

pub struct ControlSurface {
    skip_seconds: f64,
    volume_step: f64,
    view: SurfaceView,
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new(playerconfig::DEFAULT_SKIP_SECONDS, playerconfig::DEFAULT_VOLUME_STEP)
    }
}

impl ControlSurface {
    pub fn new(skip_seconds: f64, volume_step: f64) -> Self {
        Self {
            skip_seconds,
            volume_step,
            view: SurfaceView::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.get_skip_seconds(), config.get_volume_step())
    }

    pub fn view(&self) -> &SurfaceView {
        &self.view
    }

    pub fn observe(&mut self, event: &PlaybackEvent) {
        self.view.apply_event(event);
    }

    /// The command a gesture stands for, given the controller's state.
    /// `Retry` is not a command and yields `None`.
    pub fn command_for(&self, gesture: Gesture, controller: &PlaybackController) -> Option<Command> {
        let state = controller.state();
        let command = match gesture {
            Gesture::TogglePlay => {
                if state.status == PlaybackStatus::Playing {
                    Command::Pause
                } else {
                    Command::Play
                }
            }
            Gesture::SkipForward => Command::Skip(self.skip_seconds),
            Gesture::SkipBack => Command::Skip(-self.skip_seconds),
            Gesture::SeekToFraction(fraction) => {
                Command::Seek(fraction.clamp(0.0, 1.0) * state.duration_seconds)
            }
            Gesture::VolumeUp => Command::SetVolume((state.volume + self.volume_step).min(1.0)),
            Gesture::VolumeDown => Command::SetVolume((state.volume - self.volume_step).max(0.0)),
            Gesture::ToggleMute => Command::SetMuted(!state.muted),
            Gesture::CycleRate => {
                let rates = &controller.settings().allowed_rates;
                let next = rates
                    .iter()
                    .copied()
                    .find(|rate| *rate > state.playback_rate + 1e-9)
                    .or_else(|| rates.first().copied())?;
                Command::SetPlaybackRate(next)
            }
            Gesture::Retry => return None,
        };
        Some(command)
    }

    /// Applies a gesture to the controller.
    pub fn apply(&mut self, gesture: Gesture, controller: &mut PlaybackController) -> CommandOutcome {
        if gesture == Gesture::Retry {
            return match controller.retry() {
                Ok(()) => CommandOutcome::Applied,
                Err(e) => CommandOutcome::Rejected(e),
            };
        }
        match self.command_for(gesture, controller) {
            Some(command) => controller.apply(command),
            None => CommandOutcome::Applied,
        }
    }

    /// Applies the gesture bound to `key`; unbound keys return `None`.
    pub fn handle_key(
        &mut self,
        key: &str,
        controller: &mut PlaybackController,
    ) -> Option<CommandOutcome> {
        Gesture::from_key(key).map(|gesture| self.apply(gesture, controller))
    }
}
