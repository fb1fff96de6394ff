//! The playback controller.
//!
//! [`PlaybackController`] is the single owner of a player's state. It builds
//! the backend for each session, accepts or rejects user commands according
//! to the current status, turns backend signals into status transitions and
//! forwards every position update to the progress reporter.
//!
//! Nothing here runs on its own: backend signals queue up in a channel and
//! the poll timer is a deadline. [`PlaybackController::run_pending`] processes
//! both; call it from the host's event loop or let a
//! [`PlaybackDriver`](crate::driver::PlaybackDriver) call it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use playerconfig::Config;
use tracing::{debug, error, info, trace, warn};

use crate::backend::watcher::{PollTimer, ProgressStrategy};
use crate::backend::{
    BackendCapabilities, BackendProvider, BackendSignal, MediaBackend, MediaBackendAdapter,
    PlaybackProbe, RateControl, SessionSignal, SignalSink, TransportControl, VolumeControl,
};
use crate::backend::capabilities::BackendState;
use crate::clock::{Clock, SystemClock};
use crate::errors::PlaybackError;
use crate::events::PlaybackEventBus;
use crate::model::{
    Command, CommandOutcome, CompletionPolicy, PlaybackEvent, PlaybackEventKind,
    PlaybackSnapshot, PlaybackState, PlaybackStatus, PlayerId, ProgressSample,
};
use crate::reporter::{ProgressReporter, ProgressSink, ProgressUpdate};
use crate::source::{MediaSource, ResolvedSource};
use crate::state_machine::{Trigger, next_status};

const RATE_EPSILON: f64 = 1e-9;

/// Tunables of a controller.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerSettings {
    pub completion: CompletionPolicy,
    /// Position polling period for backends that do not push updates.
    pub poll_interval: Duration,
    pub progress_write_interval: Duration,
    /// Rates accepted by `set_playback_rate`, sorted ascending.
    pub allowed_rates: Vec<f64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            completion: CompletionPolicy::default(),
            poll_interval: Duration::from_millis(playerconfig::DEFAULT_POLL_INTERVAL_MS),
            progress_write_interval: Duration::from_millis(
                playerconfig::DEFAULT_PROGRESS_WRITE_INTERVAL_MS,
            ),
            allowed_rates: playerconfig::DEFAULT_ALLOWED_RATES.to_vec(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let threshold = config.get_completion_threshold();
        let completion = CompletionPolicy::new(threshold).unwrap_or_else(|e| {
            warn!(threshold, error = %e, "Invalid completion threshold, using default");
            CompletionPolicy::default()
        });
        Self {
            completion,
            poll_interval: config.get_poll_interval(),
            progress_write_interval: config.get_progress_write_interval(),
            allowed_rates: config.get_allowed_rates(),
        }
    }

    pub fn is_rate_allowed(&self, rate: f64) -> bool {
        self.allowed_rates
            .iter()
            .any(|allowed| (allowed - rate).abs() < RATE_EPSILON)
    }
}

pub struct PlaybackController {
    id: PlayerId,
    settings: ControllerSettings,
    provider: Arc<dyn BackendProvider>,
    progress_sink: Arc<dyn ProgressSink>,
    clock: Arc<dyn Clock>,
    bus: PlaybackEventBus,

    state: PlaybackState,
    session: u64,
    last_request: Option<MediaSource>,
    source: Option<ResolvedSource>,
    backend: Option<MediaBackend>,
    reporter: Option<ProgressReporter>,
    strategy: ProgressStrategy,
    poll: PollTimer,

    signal_tx: Sender<SessionSignal>,
    signal_rx: Receiver<SessionSignal>,
}

impl PlaybackController {
    pub fn new(
        provider: Arc<dyn BackendProvider>,
        progress_sink: Arc<dyn ProgressSink>,
        settings: ControllerSettings,
    ) -> Self {
        Self::with_clock(provider, progress_sink, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn BackendProvider>,
        progress_sink: Arc<dyn ProgressSink>,
        settings: ControllerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (signal_tx, signal_rx) = unbounded();
        let poll = PollTimer::new(settings.poll_interval);
        Self {
            id: PlayerId::new(),
            settings,
            provider,
            progress_sink,
            clock,
            bus: PlaybackEventBus::new(),
            state: PlaybackState::default(),
            session: 0,
            last_request: None,
            source: None,
            backend: None,
            reporter: None,
            strategy: ProgressStrategy::Push,
            poll,
            signal_tx,
            signal_rx,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.snapshot()
    }

    /// Token of the current session; bumped on every initialize and teardown.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn source(&self) -> Option<&ResolvedSource> {
        self.source.as_ref()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    pub fn capabilities(&self) -> Option<BackendCapabilities> {
        self.backend.as_ref().map(|b| b.capabilities())
    }

    /// Next instant at which `run_pending` has timer work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.poll.next_due()
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.bus.subscribe()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Starts a new session for `source`, releasing any previous one.
    ///
    /// Returns immediately; the session reaches `Ready` (or `Errored`) once
    /// the backend reports back. An `Err` means the session failed on the
    /// spot and is already `Errored`.
    pub fn initialize(&mut self, source: MediaSource) -> Result<(), PlaybackError> {
        self.release_session();
        self.session += 1;
        self.last_request = Some(source.clone());
        self.state.position_seconds = 0.0;
        self.state.duration_seconds = 0.0;
        self.state.last_error = None;

        info!(
            player = %self.id,
            session = self.session,
            kind = ?source.kind,
            locator = source.locator.as_str(),
            "Initializing playback session"
        );
        self.transition(Trigger::Initialize);

        let resolved = match source.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                self.fail(Trigger::SourceInvalid, e.clone());
                return Err(e);
            }
        };

        let mut backend = match self.provider.create(&resolved) {
            Ok(backend) => backend,
            Err(e) => {
                self.fail(Trigger::LoadFailed, e.clone());
                return Err(e);
            }
        };

        backend.on_event(SignalSink::new(self.session, self.signal_tx.clone()));
        if let Err(e) = backend.load(&resolved) {
            backend.dispose();
            self.fail(Trigger::LoadFailed, e.clone());
            return Err(e);
        }

        self.strategy = ProgressStrategy::for_backend(&backend, self.settings.poll_interval);
        debug!(
            player = %self.id,
            session = self.session,
            backend = backend.name(),
            strategy = ?self.strategy,
            "Backend loading"
        );
        self.reporter = Some(ProgressReporter::new(
            Arc::clone(&self.progress_sink),
            Arc::clone(&self.clock),
            self.settings.progress_write_interval,
        ));
        self.backend = Some(backend);
        self.source = Some(resolved);
        Ok(())
    }

    /// Re-initializes the last requested source. Used by the retry affordance
    /// after a failure.
    pub fn retry(&mut self) -> Result<(), PlaybackError> {
        let source = self.last_request.clone().ok_or_else(|| {
            PlaybackError::InvalidArgument("no source has been initialized".to_string())
        })?;
        self.initialize(source)
    }

    /// Releases everything the session holds and returns to `Idle`.
    ///
    /// Pending progress is flushed and the poll timer cancelled before this
    /// returns. Calling it again is a no-op.
    pub fn teardown(&mut self) {
        let held = self.backend.is_some() || self.reporter.is_some() || self.poll.is_armed();
        if !held && self.state.status == PlaybackStatus::Idle {
            return;
        }

        self.release_session();
        self.session += 1;
        self.state.position_seconds = 0.0;
        self.state.duration_seconds = 0.0;
        self.transition(Trigger::Teardown);
        info!(player = %self.id, session = self.session, "Playback torn down");
    }

    fn release_session(&mut self) {
        self.poll.cancel();
        if let Some(mut reporter) = self.reporter.take() {
            let flushed = reporter.flush();
            reporter.close();
            self.handle_write(flushed);
        }
        if let Some(mut backend) = self.backend.take() {
            backend.dispose();
        }
        self.source = None;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Applies a command by value; the control surface goes through here.
    pub fn apply(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Seek(seconds) => self.seek(seconds),
            Command::Skip(delta) => self.skip(delta),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SetPlaybackRate(rate) => self.set_playback_rate(rate),
        }
    }

    pub fn play(&mut self) -> CommandOutcome {
        let command = Command::Play;
        let already_playing = self.state.status == PlaybackStatus::Playing;
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };
        if already_playing {
            return CommandOutcome::Applied;
        }

        match backend.play() {
            Ok(()) => {
                self.transition(Trigger::Started);
                CommandOutcome::Applied
            }
            Err(e @ PlaybackError::PlaybackRejected(_)) => {
                warn!(player = %self.id, session = self.session, error = %e, "Playback rejected");
                self.emit(PlaybackEventKind::PlaybackRejected(e.clone()));
                CommandOutcome::Rejected(e)
            }
            Err(e) => self.reject(command, e),
        }
    }

    pub fn pause(&mut self) -> CommandOutcome {
        let command = Command::Pause;
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };
        backend.pause();
        if self.state.status == PlaybackStatus::Playing {
            self.transition(Trigger::Paused);
        }
        CommandOutcome::Applied
    }

    /// Moves the playhead to `seconds`, clamped to the media.
    pub fn seek(&mut self, seconds: f64) -> CommandOutcome {
        self.seek_to(Command::Seek(seconds), seconds)
    }

    /// Moves the playhead by `delta_seconds` (negative skips back).
    pub fn skip(&mut self, delta_seconds: f64) -> CommandOutcome {
        let target = self.state.position_seconds + delta_seconds;
        self.seek_to(Command::Skip(delta_seconds), target)
    }

    fn seek_to(&mut self, command: Command, target: f64) -> CommandOutcome {
        if !target.is_finite() {
            return self.reject(
                command,
                PlaybackError::InvalidArgument(format!("seek target {target} is not finite")),
            );
        }
        let target = self.clamp_to_media(target);
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };

        backend.seek_to(target);
        debug!(player = %self.id, session = self.session, target, "Seek");
        self.observe_position(target);
        CommandOutcome::Applied
    }

    pub fn set_volume(&mut self, volume: f64) -> CommandOutcome {
        let command = Command::SetVolume(volume);
        if !volume.is_finite() {
            return self.reject(
                command,
                PlaybackError::InvalidArgument(format!("volume {volume} is not finite")),
            );
        }
        let volume = volume.clamp(0.0, 1.0);
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };
        backend.set_volume(volume);
        self.state.volume = volume;
        self.emit(PlaybackEventKind::VolumeChanged {
            volume,
            muted: self.state.muted,
        });
        CommandOutcome::Applied
    }

    pub fn set_muted(&mut self, muted: bool) -> CommandOutcome {
        let command = Command::SetMuted(muted);
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };
        backend.set_muted(muted);
        self.state.muted = muted;
        self.emit(PlaybackEventKind::VolumeChanged {
            volume: self.state.volume,
            muted,
        });
        CommandOutcome::Applied
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> CommandOutcome {
        let command = Command::SetPlaybackRate(rate);
        if !self.settings.is_rate_allowed(rate) {
            return self.reject(command, PlaybackError::UnsupportedRate(rate));
        }
        let backend = match self.accept(&command) {
            Ok(backend) => backend,
            Err(e) => return self.reject(command, e),
        };
        if !backend.capabilities().rate_control {
            let e = PlaybackError::capability_unsupported("set_playback_rate", backend.name());
            return self.reject(command, e);
        }
        backend.set_rate(rate);
        self.state.playback_rate = rate;
        self.emit(PlaybackEventKind::RateChanged { rate });
        CommandOutcome::Applied
    }

    /// Checks a command against the current status and hands out the backend.
    fn accept(&mut self, command: &Command) -> Result<&mut MediaBackend, PlaybackError> {
        let status = self.state.status;
        let allowed = match status {
            PlaybackStatus::Ready | PlaybackStatus::Playing | PlaybackStatus::Paused => true,
            PlaybackStatus::Ended => {
                !command.is_transport() || matches!(command, Command::Pause)
            }
            PlaybackStatus::Errored => {
                return Err(PlaybackError::BackendUnavailable(match &self.state.last_error {
                    Some(e) => format!("player errored: {e}"),
                    None => "player errored".to_string(),
                }));
            }
            PlaybackStatus::Idle | PlaybackStatus::Loading => false,
        };
        if !allowed {
            return Err(PlaybackError::invalid_state(command.name(), status));
        }
        self.backend
            .as_mut()
            .ok_or_else(|| PlaybackError::BackendUnavailable("no backend".to_string()))
    }

    fn reject(&mut self, command: Command, error: PlaybackError) -> CommandOutcome {
        warn!(
            player = %self.id,
            session = self.session,
            command = command.name(),
            status = %self.state.status,
            error = %error,
            "Command rejected"
        );
        self.emit(PlaybackEventKind::CommandRejected {
            command,
            error: error.clone(),
        });
        CommandOutcome::Rejected(error)
    }

    // =========================================================================
    // Signal and timer processing
    // =========================================================================

    /// Processes queued backend signals, then fires the poll timer if due.
    ///
    /// Returns the number of signals and ticks handled. Signals from a
    /// previous session are discarded.
    pub fn run_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(SessionSignal { session, signal }) = self.signal_rx.try_recv() {
            if session != self.session {
                trace!(
                    player = %self.id,
                    current = self.session,
                    stale = session,
                    signal = ?signal,
                    "Dropping stale backend signal"
                );
                continue;
            }
            self.handle_signal(signal);
            handled += 1;
        }

        if self.poll.take_due(self.clock.now()) {
            self.poll_backend();
            handled += 1;
        }
        handled
    }

    fn handle_signal(&mut self, signal: BackendSignal) {
        trace!(player = %self.id, session = self.session, signal = ?signal, "Backend signal");
        let status = self.state.status;

        match signal {
            BackendSignal::MetadataLoaded { duration_seconds } => {
                if status == PlaybackStatus::Loading {
                    self.update_duration(duration_seconds);
                    if self.transition(Trigger::MetadataLoaded) {
                        self.on_ready();
                    }
                } else if status.has_backend() {
                    self.update_duration(duration_seconds);
                }
            }
            BackendSignal::DurationChanged { duration_seconds } => {
                if status == PlaybackStatus::Loading || status.has_backend() {
                    self.update_duration(duration_seconds);
                }
            }
            BackendSignal::TimeUpdate { position_seconds } => {
                if matches!(
                    status,
                    PlaybackStatus::Ready | PlaybackStatus::Playing | PlaybackStatus::Paused
                ) {
                    self.observe_position(position_seconds);
                }
            }
            BackendSignal::Started => {
                self.transition(Trigger::Started);
            }
            BackendSignal::Paused => {
                self.transition(Trigger::Paused);
            }
            BackendSignal::Ended => {
                if status == PlaybackStatus::Playing {
                    if self.state.duration_seconds > 0.0 {
                        self.state.position_seconds = self.state.duration_seconds;
                    }
                    self.transition(Trigger::BackendEnded);
                }
            }
            BackendSignal::Buffering => {
                debug!(player = %self.id, session = self.session, "Backend buffering");
            }
            BackendSignal::LoadFailed(e) => {
                if status == PlaybackStatus::Loading {
                    self.fail(Trigger::LoadFailed, e);
                } else {
                    debug!(player = %self.id, error = %e, status = %status, "Late load failure ignored");
                }
            }
            BackendSignal::Fault(e) => {
                self.fail(Trigger::Fault, e);
            }
        }
    }

    fn poll_backend(&mut self) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let position = backend.position();
        let duration = backend.duration();
        let ended = backend.state() == BackendState::Ended;

        self.update_duration(duration);
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        self.observe_position(position);

        if ended && self.state.status == PlaybackStatus::Playing {
            if self.state.duration_seconds > 0.0 {
                self.state.position_seconds = self.state.duration_seconds;
            }
            self.transition(Trigger::BackendEnded);
        }
    }

    /// Routes one position observation to the event stream, the completion
    /// check and the reporter.
    ///
    /// The position is clamped to the media once the duration is known.
    fn observe_position(&mut self, position_seconds: f64) {
        if !position_seconds.is_finite() {
            return;
        }
        self.state.position_seconds = self.clamp_to_media(position_seconds);
        self.emit(PlaybackEventKind::PositionChanged);

        if self.check_completion() {
            return;
        }

        let sample = self.state.sample();
        if let Some(reporter) = self.reporter.as_mut() {
            let written = reporter.report(sample);
            self.handle_write(written);
        }
    }

    /// Records a new duration. Unknown or invalid durations are ignored; a
    /// shorter duration pulls the position back inside the media.
    fn update_duration(&mut self, duration_seconds: f64) {
        if !(duration_seconds.is_finite() && duration_seconds > 0.0)
            || duration_seconds == self.state.duration_seconds
        {
            return;
        }
        self.state.duration_seconds = duration_seconds;
        if self.state.position_seconds > duration_seconds {
            self.state.position_seconds = duration_seconds;
            self.emit(PlaybackEventKind::PositionChanged);
        }
        self.check_completion();
    }

    fn clamp_to_media(&self, seconds: f64) -> f64 {
        let duration = self.state.duration_seconds;
        if duration > 0.0 {
            seconds.clamp(0.0, duration)
        } else {
            seconds.max(0.0)
        }
    }

    /// Ends the session the first time the threshold is reached while
    /// playing. Returns true when it did.
    fn check_completion(&mut self) -> bool {
        if self.state.status != PlaybackStatus::Playing {
            return false;
        }
        let sample = self.state.sample();
        if !self.settings.completion.is_complete(&sample) {
            return false;
        }
        debug!(
            player = %self.id,
            session = self.session,
            fraction = sample.fraction_complete,
            threshold = self.settings.completion.threshold_fraction(),
            "Completion threshold reached"
        );
        self.transition(Trigger::CompletionReached)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Applies `trigger` if the state machine allows it. Returns whether the
    /// status changed.
    fn transition(&mut self, trigger: Trigger) -> bool {
        let from = self.state.status;
        let Some(to) = next_status(from, trigger) else {
            trace!(player = %self.id, status = %from, trigger = ?trigger, "No transition");
            return false;
        };
        if to == from {
            return false;
        }

        if from == PlaybackStatus::Playing {
            self.poll.cancel();
        }
        self.state.status = to;
        debug!(
            player = %self.id,
            session = self.session,
            from = %from,
            to = %to,
            trigger = ?trigger,
            "Status transition"
        );
        self.emit(PlaybackEventKind::StatusChanged { from, to });

        match to {
            PlaybackStatus::Playing => {
                if self.strategy.polling_interval().is_some() {
                    self.poll.arm(self.clock.now());
                }
            }
            PlaybackStatus::Ended => self.on_ended(),
            _ => {}
        }
        true
    }

    /// Re-applies the user's preferences to the fresh backend and resumes.
    fn on_ready(&mut self) {
        let volume = self.state.volume;
        let muted = self.state.muted;
        let rate = self.state.playback_rate;
        let duration = self.state.duration_seconds;
        let resume_from = self.source.as_ref().and_then(|s| s.resume_from());

        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        backend.set_volume(volume);
        backend.set_muted(muted);
        if (rate - 1.0).abs() > RATE_EPSILON {
            if backend.capabilities().rate_control {
                backend.set_rate(rate);
            } else {
                self.state.playback_rate = 1.0;
            }
        }

        if let Some(resume) = resume_from.filter(|r| *r > 0.0 && *r < duration) {
            backend.seek_to(resume);
            self.state.position_seconds = resume;
            debug!(player = %self.id, session = self.session, resume, "Resuming");
            self.emit(PlaybackEventKind::PositionChanged);
        }
    }

    fn on_ended(&mut self) {
        let sample = ProgressSample::new(self.state.position_seconds, self.state.duration_seconds);
        let Some(reporter) = self.reporter.as_mut() else {
            return;
        };
        if reporter.is_completed() {
            return;
        }
        let written = reporter.complete(sample);
        self.handle_write(written);
        self.emit(PlaybackEventKind::Completed);
    }

    fn fail(&mut self, trigger: Trigger, e: PlaybackError) {
        if !self.transition(trigger) {
            debug!(player = %self.id, status = %self.state.status, error = %e, "Failure ignored in current status");
            return;
        }
        self.state.last_error = Some(e.clone());
        error!(
            player = %self.id,
            session = self.session,
            error = %e,
            "Playback errored"
        );
        self.release_session();
        self.emit(PlaybackEventKind::Errored(e));
    }

    fn handle_write(&mut self, written: anyhow::Result<Option<ProgressUpdate>>) {
        if let Err(e) = written {
            warn!(player = %self.id, session = self.session, error = %e, "Progress write failed");
            self.emit(PlaybackEventKind::ProgressWriteFailed(format!("{e:#}")));
        }
    }

    fn emit(&self, kind: PlaybackEventKind) {
        self.bus.broadcast(PlaybackEvent {
            player: self.id.clone(),
            session: self.session,
            snapshot: self.state.snapshot(),
            kind,
        });
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::embedded::EmbedPlayerState;
    use crate::backend::native::MediaElementEvent;
    use crate::errors::LoadFailure;
    use crate::testing::Rig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn statuses(rx: &Receiver<PlaybackEvent>) -> Vec<(PlaybackStatus, PlaybackStatus)> {
        rx.try_iter()
            .filter_map(|e| match e.kind {
                PlaybackEventKind::StatusChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    fn ready_native(rig: &Rig, controller: &mut PlaybackController, duration: f64) {
        controller.initialize(MediaSource::native("a.mp4")).unwrap();
        rig.media.last().fire(MediaElementEvent::LoadedMetadata {
            duration_seconds: duration,
        });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Ready);
    }

    fn playing_youtube(rig: &Rig, controller: &mut PlaybackController) {
        controller
            .initialize(MediaSource::youtube("https://youtu.be/dQw4w9WgXcQ"))
            .unwrap();
        rig.injector.resolve_ready(crate::model::EmbedTechnology::YouTube);
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Ready);
        assert!(controller.play().is_applied());
    }

    #[test]
    fn test_native_happy_path_completes_once() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();

        ready_native(&rig, &mut controller, 120.0);
        assert!(controller.play().is_applied());
        assert_eq!(controller.status(), PlaybackStatus::Playing);

        let element = rig.media.last();
        for t in 0..=114 {
            rig.clock.advance(Duration::from_secs(1));
            element.fire(MediaElementEvent::TimeUpdate {
                current_time: t as f64,
            });
            controller.run_pending();
        }

        assert_eq!(controller.status(), PlaybackStatus::Ended);
        assert_eq!(rig.sink.completions(), 1);
        let completion = rig.sink.updates().into_iter().find(|u| u.completed).unwrap();
        assert_eq!(completion.position_seconds, 114.0);
        assert_eq!(completion.fraction_complete, 0.95);

        let transitions = statuses(&events);
        assert_eq!(transitions.last(), Some(&(PlaybackStatus::Playing, PlaybackStatus::Ended)));
    }

    #[test]
    fn test_completion_fires_exactly_once() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        ready_native(&rig, &mut controller, 100.0);
        controller.play();

        let element = rig.media.last();
        for t in [50.0, 96.0, 97.0, 95.5, 99.0, 100.0] {
            element.fire(MediaElementEvent::TimeUpdate { current_time: t });
        }
        element.fire(MediaElementEvent::Ended);
        controller.run_pending();

        // a replay request after the end is refused
        assert!(!controller.play().is_applied());
        element.fire(MediaElementEvent::TimeUpdate { current_time: 99.5 });
        controller.run_pending();

        assert_eq!(rig.sink.completions(), 1);
        let completed_events = events
            .try_iter()
            .filter(|e| e.kind == PlaybackEventKind::Completed)
            .count();
        assert_eq!(completed_events, 1);
    }

    #[test]
    fn test_backend_end_below_threshold_still_completes() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 100.0);
        controller.play();
        rig.media.last().fire(MediaElementEvent::Ended);
        controller.run_pending();

        assert_eq!(controller.status(), PlaybackStatus::Ended);
        assert_eq!(rig.sink.completions(), 1);
        assert_eq!(controller.state().position_seconds, 100.0);
    }

    #[test]
    fn test_teardown_is_idempotent_and_cancels_poll() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        playing_youtube(&rig, &mut controller);
        assert!(controller.next_deadline().is_some());

        controller.teardown();
        let after_first = (controller.status(), controller.session(), controller.snapshot());
        let queries = rig.host.player_state().position_queries;
        let _ = events.try_iter().count();

        for _ in 0..3 {
            controller.teardown();
        }
        assert_eq!(
            (controller.status(), controller.session(), controller.snapshot()),
            after_first
        );
        assert_eq!(controller.status(), PlaybackStatus::Idle);
        assert!(controller.next_deadline().is_none());
        assert!(rig.host.player_state().destroyed);

        rig.clock.advance(Duration::from_secs(30));
        assert_eq!(controller.run_pending(), 0);
        assert_eq!(rig.host.player_state().position_queries, queries);
        assert_eq!(events.try_iter().count(), 0);
    }

    #[test]
    fn test_poll_only_while_playing() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        playing_youtube(&rig, &mut controller);

        rig.host.set_position(12.0);
        rig.clock.advance(Duration::from_secs(1));
        controller.run_pending();
        assert_eq!(controller.state().position_seconds, 12.0);
        let queries = rig.host.player_state().position_queries;

        assert!(controller.pause().is_applied());
        assert!(controller.next_deadline().is_none());
        rig.clock.advance(Duration::from_secs(5));
        controller.run_pending();
        assert_eq!(rig.host.player_state().position_queries, queries);

        controller.play();
        rig.host.set_position(13.0);
        rig.clock.advance(Duration::from_secs(1));
        controller.run_pending();
        assert_eq!(controller.state().position_seconds, 13.0);
    }

    #[test]
    fn test_polled_end_of_video() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        playing_youtube(&rig, &mut controller);

        rig.host.set_position(50.0);
        rig.host.set_state(EmbedPlayerState::Ended);
        rig.clock.advance(Duration::from_secs(1));
        controller.run_pending();

        assert_eq!(controller.status(), PlaybackStatus::Ended);
        assert!(controller.next_deadline().is_none());
        assert_eq!(rig.sink.completions(), 1);
    }

    #[test]
    fn test_embedded_instances_share_one_bootstrap() {
        let rig = Rig::new();
        let mut first = rig.controller();
        let mut second = rig.controller();

        first.initialize(MediaSource::youtube("dQw4w9WgXcQ")).unwrap();
        second
            .initialize(MediaSource::youtube("https://www.youtube.com/watch?v=9bZkp7q19f0"))
            .unwrap();
        first.run_pending();
        second.run_pending();
        assert_eq!(first.status(), PlaybackStatus::Loading);
        assert_eq!(second.status(), PlaybackStatus::Loading);
        assert_eq!(rig.injector.requests(crate::model::EmbedTechnology::YouTube), 1);

        assert!(rig.injector.resolve_ready(crate::model::EmbedTechnology::YouTube));
        first.run_pending();
        second.run_pending();
        assert_eq!(first.status(), PlaybackStatus::Ready);
        assert_eq!(second.status(), PlaybackStatus::Ready);
        assert_eq!(rig.host.created(), 2);
        assert_eq!(rig.injector.requests(crate::model::EmbedTechnology::YouTube), 1);
    }

    #[test]
    fn test_invalid_source_errors_before_any_backend() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();

        let err = controller
            .initialize(MediaSource::youtube("not-a-valid-id"))
            .unwrap_err();
        assert!(matches!(err, PlaybackError::SourceValidation(_)));
        assert_eq!(controller.status(), PlaybackStatus::Errored);
        assert_eq!(controller.state().last_error, Some(err.clone()));
        assert_eq!(rig.host.created(), 0);
        assert_eq!(rig.media.created(), 0);
        assert_eq!(rig.injector.total_requests(), 0);
        assert!(controller.backend_name().is_none());

        let kinds: Vec<PlaybackEventKind> = events.try_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&PlaybackEventKind::StatusChanged {
            from: PlaybackStatus::Loading,
            to: PlaybackStatus::Errored
        }));
        assert!(kinds.contains(&PlaybackEventKind::Errored(err)));
    }

    #[test]
    fn test_stale_load_does_not_touch_new_session() {
        let rig = Rig::new();
        let mut controller = rig.controller();

        controller.initialize(MediaSource::native("a.mp4")).unwrap();
        let element_a = rig.media.last();
        // resolved but not yet processed when B replaces it
        element_a.fire(MediaElementEvent::LoadedMetadata {
            duration_seconds: 60.0,
        });

        controller.initialize(MediaSource::native("b.mp4")).unwrap();
        let element_b = rig.media.last();
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Loading);
        assert_eq!(controller.state().duration_seconds, 0.0);

        // A resolving later reaches nobody
        element_a.fire_late(MediaElementEvent::LoadedMetadata {
            duration_seconds: 60.0,
        });
        element_a.fire_late(MediaElementEvent::Error {
            code: 2,
            message: String::new(),
        });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Loading);
        assert!(element_a.state().release_count >= 1);

        element_b.fire(MediaElementEvent::LoadedMetadata {
            duration_seconds: 240.0,
        });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Ready);
        assert_eq!(controller.state().duration_seconds, 240.0);
        assert_eq!(controller.source().map(|s| s.locator()), Some("b.mp4"));
    }

    #[test]
    fn test_stale_embed_bootstrap_does_not_create_player() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        controller.initialize(MediaSource::youtube("dQw4w9WgXcQ")).unwrap();
        controller.initialize(MediaSource::native("b.mp4")).unwrap();

        rig.injector.resolve_ready(crate::model::EmbedTechnology::YouTube);
        controller.run_pending();
        assert_eq!(rig.host.created(), 0);
        assert_eq!(controller.status(), PlaybackStatus::Loading);
    }

    #[test]
    fn test_commands_rejected_while_loading_and_errored() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();

        assert_eq!(
            controller.play(),
            CommandOutcome::Rejected(PlaybackError::invalid_state("play", PlaybackStatus::Idle))
        );

        controller.initialize(MediaSource::native("a.mp4")).unwrap();
        assert_eq!(
            controller.seek(10.0),
            CommandOutcome::Rejected(PlaybackError::invalid_state(
                "seek",
                PlaybackStatus::Loading
            ))
        );

        rig.media.last().fire(MediaElementEvent::Error {
            code: 4,
            message: String::new(),
        });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Errored);
        assert!(matches!(
            controller.state().last_error,
            Some(PlaybackError::BackendLoad(LoadFailure::MediaLoad(_)))
        ));
        assert!(matches!(
            controller.set_volume(0.5),
            CommandOutcome::Rejected(PlaybackError::BackendUnavailable(_))
        ));

        let rejected = events
            .try_iter()
            .filter(|e| matches!(e.kind, PlaybackEventKind::CommandRejected { .. }))
            .count();
        assert_eq!(rejected, 3);
    }

    #[test]
    fn test_retry_after_failure() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        controller.initialize(MediaSource::native("a.mp4")).unwrap();
        rig.media.last().fire(MediaElementEvent::Error {
            code: 2,
            message: String::new(),
        });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Errored);

        controller.retry().unwrap();
        assert_eq!(controller.status(), PlaybackStatus::Loading);
        assert_eq!(rig.media.created(), 2);
    }

    #[test]
    fn test_autoplay_rejection_is_recoverable() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        ready_native(&rig, &mut controller, 60.0);

        rig.media.last().reject_play("NotAllowedError");
        assert!(matches!(
            controller.play(),
            CommandOutcome::Rejected(PlaybackError::PlaybackRejected(_))
        ));
        assert_eq!(controller.status(), PlaybackStatus::Ready);
        assert!(
            events
                .try_iter()
                .any(|e| matches!(e.kind, PlaybackEventKind::PlaybackRejected(_)))
        );

        rig.media.last().allow_play();
        assert!(controller.play().is_applied());
        assert_eq!(controller.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_ended_accepts_preferences_and_pause_only() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 10.0);
        controller.play();
        rig.media.last().fire(MediaElementEvent::Ended);
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Ended);

        assert!(controller.set_volume(0.3).is_applied());
        assert!(controller.set_muted(true).is_applied());
        assert!(controller.pause().is_applied());
        assert_eq!(controller.status(), PlaybackStatus::Ended);
        assert!(!controller.seek(1.0).is_applied());
        assert!(!controller.skip(-5.0).is_applied());
    }

    #[test]
    fn test_seek_and_skip_clamp_to_media() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 60.0);

        assert!(controller.seek(90.0).is_applied());
        assert_eq!(controller.state().position_seconds, 60.0);
        assert!(controller.skip(-100.0).is_applied());
        assert_eq!(controller.state().position_seconds, 0.0);
        assert!(controller.skip(10.0).is_applied());
        assert_eq!(rig.media.last().state().seeks, vec![60.0, 0.0, 10.0]);
        assert!(!controller.seek(f64::NAN).is_applied());
    }

    #[test]
    fn test_rate_checks() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 60.0);

        assert_eq!(
            controller.set_playback_rate(3.0),
            CommandOutcome::Rejected(PlaybackError::UnsupportedRate(3.0))
        );
        assert!(controller.set_playback_rate(1.5).is_applied());
        assert_eq!(rig.media.last().state().rate, 1.5);

        let mut vimeo = rig.controller();
        vimeo.initialize(MediaSource::vimeo("76979871")).unwrap();
        rig.injector.resolve_ready(crate::model::EmbedTechnology::Vimeo);
        vimeo.run_pending();
        assert_eq!(vimeo.status(), PlaybackStatus::Ready);
        assert_eq!(
            vimeo.set_playback_rate(1.5),
            CommandOutcome::Rejected(PlaybackError::capability_unsupported(
                "set_playback_rate",
                "vimeo"
            ))
        );
    }

    #[test]
    fn test_preferences_and_resume_applied_on_ready() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 60.0);
        controller.set_volume(0.4);
        controller.set_muted(true);
        controller.set_playback_rate(1.25);

        controller
            .initialize(MediaSource::native("b.mp4").with_resume_from(42.0))
            .unwrap();
        let element = rig.media.last();
        element.fire(MediaElementEvent::LoadedMetadata {
            duration_seconds: 300.0,
        });
        controller.run_pending();

        let state = element.state();
        assert_eq!(state.volume, 0.4);
        assert!(state.muted);
        assert_eq!(state.rate, 1.25);
        assert_eq!(state.seeks, vec![42.0]);
        assert_eq!(controller.state().position_seconds, 42.0);
    }

    #[test]
    fn test_teardown_flushes_pending_progress() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 600.0);
        controller.play();

        let element = rig.media.last();
        for t in 1..=5 {
            element.fire(MediaElementEvent::TimeUpdate {
                current_time: t as f64,
            });
        }
        controller.run_pending();
        assert_eq!(rig.sink.positions(), vec![1.0]);

        controller.teardown();
        assert_eq!(rig.sink.positions(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_progress_write_failure_is_surfaced() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        ready_native(&rig, &mut controller, 600.0);
        controller.play();

        rig.sink.fail_next("quota exceeded");
        rig.media.last().fire(MediaElementEvent::TimeUpdate { current_time: 1.0 });
        controller.run_pending();

        assert_eq!(controller.status(), PlaybackStatus::Playing);
        assert!(events.try_iter().any(|e| matches!(
            &e.kind,
            PlaybackEventKind::ProgressWriteFailed(msg) if msg.contains("quota exceeded")
        )));
    }

    #[test]
    fn test_position_stays_inside_shrinking_duration() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        ready_native(&rig, &mut controller, 120.0);

        let element = rig.media.last();
        element.fire(MediaElementEvent::TimeUpdate { current_time: 130.0 });
        controller.run_pending();
        assert_eq!(controller.state().position_seconds, 120.0);
        assert_eq!(controller.status(), PlaybackStatus::Ready);

        assert!(controller.play().is_applied());
        element.fire(MediaElementEvent::DurationChange {
            duration_seconds: 60.0,
        });
        controller.run_pending();

        let state = controller.state();
        assert_eq!(state.duration_seconds, 60.0);
        assert_eq!(state.position_seconds, 60.0);
        assert_eq!(controller.status(), PlaybackStatus::Ended);
        assert_eq!(rig.sink.completions(), 1);
        let completion = rig.sink.updates().into_iter().find(|u| u.completed).unwrap();
        assert_eq!(completion.position_seconds, 60.0);
        assert_eq!(completion.fraction_complete, 1.0);
        assert!(events.try_iter().any(|e| e.kind == PlaybackEventKind::Completed));
    }

    #[test]
    fn test_paused_and_seeked_positions_reach_progress() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 600.0);
        controller.play();

        let element = rig.media.last();
        for t in 1..=5 {
            element.fire(MediaElementEvent::TimeUpdate {
                current_time: t as f64,
            });
        }
        controller.run_pending();
        assert!(controller.pause().is_applied());
        element.fire(MediaElementEvent::TimeUpdate { current_time: 5.4 });
        controller.run_pending();

        assert!(controller.seek(80.0).is_applied());
        element.fire(MediaElementEvent::TimeUpdate { current_time: 80.0 });
        controller.run_pending();
        assert_eq!(controller.status(), PlaybackStatus::Paused);

        controller.teardown();
        let positions = rig.sink.positions();
        assert_eq!(positions.last(), Some(&80.0));
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert_eq!(rig.sink.completions(), 0);
    }

    #[test]
    fn test_ready_seek_is_written_on_teardown() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        ready_native(&rig, &mut controller, 300.0);

        assert!(controller.seek(45.0).is_applied());
        controller.teardown();
        assert_eq!(rig.sink.positions(), vec![45.0]);
    }

    #[test]
    fn test_first_fault_cause_is_kept() {
        let rig = Rig::new();
        let mut controller = rig.controller();
        let events = controller.subscribe();
        ready_native(&rig, &mut controller, 60.0);

        let element = rig.media.last();
        element.fire(MediaElementEvent::Error {
            code: 3,
            message: String::new(),
        });
        element.fire(MediaElementEvent::Error {
            code: 2,
            message: String::new(),
        });
        controller.run_pending();

        assert_eq!(controller.status(), PlaybackStatus::Errored);
        assert_eq!(
            controller.state().last_error,
            Some(PlaybackError::Fault("media could not be decoded".to_string()))
        );
        let errored = events
            .try_iter()
            .filter(|e| matches!(e.kind, PlaybackEventKind::Errored(_)))
            .count();
        assert_eq!(errored, 1);
    }

    #[test]
    fn test_random_command_and_signal_sequences_stay_legal() {
        let mut rng = StdRng::seed_from_u64(0xc0ffee);
        for _ in 0..20 {
            let rig = Rig::new();
            let mut controller = rig.controller();
            let events = controller.subscribe();

            for _ in 0..200 {
                match rng.random_range(0..14) {
                    0 => {
                        let _ = controller.initialize(MediaSource::native("a.mp4"));
                    }
                    1 => {
                        let _ = controller.initialize(MediaSource::youtube("dQw4w9WgXcQ"));
                    }
                    2 => {
                        controller.play();
                    }
                    3 => {
                        controller.pause();
                    }
                    4 => {
                        controller.seek(rng.random_range(0.0..200.0));
                    }
                    5 => controller.teardown(),
                    6 => {
                        if rig.media.created() > 0 {
                            rig.media.last().fire(MediaElementEvent::LoadedMetadata {
                                duration_seconds: 100.0,
                            });
                        }
                    }
                    7 => {
                        if rig.media.created() > 0 {
                            rig.media.last().fire(MediaElementEvent::TimeUpdate {
                                current_time: rng.random_range(0.0..100.0),
                            });
                        }
                    }
                    8 => {
                        if rig.media.created() > 0 {
                            rig.media.last().fire(MediaElementEvent::Ended);
                        }
                    }
                    9 => {
                        if rig.media.created() > 0 {
                            rig.media.last().fire(MediaElementEvent::Error {
                                code: rng.random_range(1..5),
                                message: String::new(),
                            });
                        }
                    }
                    10 => {
                        rig.injector.resolve_ready(crate::model::EmbedTechnology::YouTube);
                    }
                    11 => {
                        if rig.media.created() > 0 {
                            rig.media.last().fire(MediaElementEvent::Pause);
                        }
                    }
                    12 => {
                        rig.host.set_position(rng.random_range(0.0..300.0));
                    }
                    _ => rig.clock.advance(Duration::from_millis(rng.random_range(0..2000))),
                }
                controller.run_pending();
            }

            let mut current = PlaybackStatus::Idle;
            for (from, to) in statuses(&events) {
                assert_eq!(from, current, "events out of order");
                assert!(
                    Trigger::ALL
                        .iter()
                        .any(|t| next_status(from, *t) == Some(to)),
                    "illegal transition {from:?} -> {to:?}"
                );
                current = to;
            }
            assert_eq!(current, controller.status());
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::from_yaml_str(
            "playback:\n  completion_threshold: 0.9\n  poll_interval_ms: 500\n  allowed_rates: [1.0, 2.0]\n",
        )
        .unwrap();
        let settings = ControllerSettings::from_config(&config);
        assert_eq!(settings.completion.threshold_fraction(), 0.9);
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.progress_write_interval, Duration::from_secs(10));
        assert!(settings.is_rate_allowed(2.0));
        assert!(!settings.is_rate_allowed(1.5));
    }
}
