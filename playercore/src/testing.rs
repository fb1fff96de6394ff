//! In-crate fakes for the host collaborators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use crate::backend::bootstrap::{ReadyNotifier, ScriptBootstrap, ScriptInjector, ScriptRequest};
use crate::backend::embedded::{
    EmbedEventSink, EmbedHost, EmbedPlayerEvent, EmbedPlayerSpec, EmbedPlayerState, EmbeddedPlayer,
};
use crate::backend::native::{
    MediaElement, MediaElementEvent, MediaElementFactory, MediaElementListener,
};
use crate::backend::{ProtectionPolicy, StandardBackends};
use crate::clock::ManualClock;
use crate::controller::{ControllerSettings, PlaybackController};
use crate::model::EmbedTechnology;
use crate::reporter::{ProgressSink, ProgressUpdate};

// ============================================================================
// Media element
// ============================================================================

/// Observable state of a [`FakeMediaElement`].
#[derive(Clone, Debug)]
pub struct FakeElementState {
    pub source: Option<String>,
    pub protection: Option<ProtectionPolicy>,
    pub has_listener: bool,
    pub paused: bool,
    pub ended: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    pub rate: f64,
    pub seeks: Vec<f64>,
    pub play_calls: usize,
    pub release_count: usize,
}

impl Default for FakeElementState {
    fn default() -> Self {
        Self {
            source: None,
            protection: None,
            has_listener: false,
            paused: true,
            ended: false,
            current_time: 0.0,
            duration: f64::NAN,
            volume: 1.0,
            muted: false,
            rate: 1.0,
            seeks: Vec::new(),
            play_calls: 0,
            release_count: 0,
        }
    }
}

#[derive(Default)]
struct ElementShared {
    state: FakeElementState,
    listener: Option<MediaElementListener>,
    last_listener: Option<MediaElementListener>,
    reject_play: Option<String>,
}

pub struct FakeMediaElement {
    shared: Arc<Mutex<ElementShared>>,
}

/// Test-side view of a fake element.
#[derive(Clone)]
pub struct FakeElementHandle {
    shared: Arc<Mutex<ElementShared>>,
}

impl FakeMediaElement {
    pub fn new() -> (Self, FakeElementHandle) {
        let shared = Arc::new(Mutex::new(ElementShared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            FakeElementHandle { shared },
        )
    }

    fn with<R>(&self, f: impl FnOnce(&mut ElementShared) -> R) -> R {
        f(&mut self.shared.lock().expect("fake element poisoned"))
    }
}

impl MediaElement for FakeMediaElement {
    fn set_source(&mut self, url: &str) -> Result<(), String> {
        self.with(|s| s.state.source = Some(url.to_string()));
        Ok(())
    }

    fn set_listener(&mut self, listener: Option<MediaElementListener>) {
        self.with(|s| {
            s.state.has_listener = listener.is_some();
            if listener.is_some() {
                s.last_listener = listener.clone();
            }
            s.listener = listener;
        });
    }

    fn apply_protection(&mut self, policy: &ProtectionPolicy) {
        self.with(|s| s.state.protection = Some(*policy));
    }

    fn play(&mut self) -> Result<(), String> {
        self.with(|s| {
            s.state.play_calls += 1;
            match &s.reject_play {
                Some(reason) => Err(reason.clone()),
                None => {
                    s.state.paused = false;
                    Ok(())
                }
            }
        })
    }

    fn pause(&mut self) {
        self.with(|s| s.state.paused = true);
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.with(|s| {
            s.state.current_time = seconds;
            s.state.seeks.push(seconds);
        });
    }

    fn current_time(&self) -> f64 {
        self.with(|s| s.state.current_time)
    }

    fn duration(&self) -> f64 {
        self.with(|s| s.state.duration)
    }

    fn is_paused(&self) -> bool {
        self.with(|s| s.state.paused)
    }

    fn is_ended(&self) -> bool {
        self.with(|s| s.state.ended)
    }

    fn is_waiting(&self) -> bool {
        false
    }

    fn set_volume(&mut self, volume: f64) {
        self.with(|s| s.state.volume = volume);
    }

    fn set_muted(&mut self, muted: bool) {
        self.with(|s| s.state.muted = muted);
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.with(|s| s.state.rate = rate);
    }

    fn release(&mut self) {
        self.with(|s| {
            s.state.source = None;
            s.state.release_count += 1;
        });
    }
}

impl FakeElementHandle {
    pub fn state(&self) -> FakeElementState {
        self.shared
            .lock()
            .expect("fake element poisoned")
            .state
            .clone()
    }

    /// Raises `event` on the currently attached listener, if any.
    pub fn fire(&self, event: MediaElementEvent) {
        let listener = {
            let mut shared = self.shared.lock().expect("fake element poisoned");
            Self::track(&mut shared.state, &event);
            shared.listener.clone()
        };
        if let Some(listener) = listener {
            listener.dispatch(event);
        }
    }

    /// Raises `event` on the last listener ever attached, as a runtime would
    /// for an event already queued when the listener was removed.
    pub fn fire_late(&self, event: MediaElementEvent) {
        let listener = self
            .shared
            .lock()
            .expect("fake element poisoned")
            .last_listener
            .clone();
        if let Some(listener) = listener {
            listener.dispatch(event);
        }
    }

    pub fn reject_play(&self, reason: &str) {
        self.shared.lock().expect("fake element poisoned").reject_play = Some(reason.to_string());
    }

    pub fn allow_play(&self) {
        self.shared.lock().expect("fake element poisoned").reject_play = None;
    }

    fn track(state: &mut FakeElementState, event: &MediaElementEvent) {
        match event {
            MediaElementEvent::LoadedMetadata { duration_seconds }
            | MediaElementEvent::DurationChange { duration_seconds } => {
                state.duration = *duration_seconds;
            }
            MediaElementEvent::TimeUpdate { current_time } => state.current_time = *current_time,
            MediaElementEvent::Pause => state.paused = true,
            MediaElementEvent::Ended => {
                state.paused = true;
                state.ended = true;
            }
            _ => {}
        }
    }
}

#[derive(Default)]
pub struct FakeMediaFactory {
    handles: Mutex<Vec<FakeElementHandle>>,
}

impl FakeMediaFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.handles.lock().expect("fake factory poisoned").len()
    }

    pub fn last(&self) -> FakeElementHandle {
        self.handles
            .lock()
            .expect("fake factory poisoned")
            .last()
            .cloned()
            .expect("no media element created")
    }
}

impl MediaElementFactory for FakeMediaFactory {
    fn create_element(&self) -> Result<Box<dyn MediaElement>, String> {
        let (element, handle) = FakeMediaElement::new();
        self.handles
            .lock()
            .expect("fake factory poisoned")
            .push(handle);
        Ok(Box::new(element))
    }
}

// ============================================================================
// Embedded player
// ============================================================================

#[derive(Clone, Debug)]
pub struct FakePlayerState {
    pub position: f64,
    pub duration: f64,
    pub state: EmbedPlayerState,
    pub volume: f64,
    pub muted: bool,
    pub rate: f64,
    pub seeks: Vec<f64>,
    pub position_queries: usize,
    pub destroyed: bool,
}

impl Default for FakePlayerState {
    fn default() -> Self {
        Self {
            position: 0.0,
            duration: 300.0,
            state: EmbedPlayerState::Unstarted,
            volume: 100.0,
            muted: false,
            rate: 1.0,
            seeks: Vec::new(),
            position_queries: 0,
            destroyed: false,
        }
    }
}

struct FakeEmbeddedPlayer {
    state: Arc<Mutex<FakePlayerState>>,
}

impl FakeEmbeddedPlayer {
    fn with<R>(&self, f: impl FnOnce(&mut FakePlayerState) -> R) -> R {
        f(&mut self.state.lock().expect("fake player poisoned"))
    }
}

impl EmbeddedPlayer for FakeEmbeddedPlayer {
    fn play(&mut self) {
        self.with(|s| s.state = EmbedPlayerState::Playing);
    }

    fn pause(&mut self) {
        self.with(|s| s.state = EmbedPlayerState::Paused);
    }

    fn seek_to(&mut self, seconds: f64) {
        self.with(|s| {
            s.position = seconds;
            s.seeks.push(seconds);
        });
    }

    fn set_volume(&mut self, volume: f64) {
        self.with(|s| s.volume = volume);
    }

    fn set_muted(&mut self, muted: bool) {
        self.with(|s| s.muted = muted);
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.with(|s| s.rate = rate);
    }

    fn current_time(&self) -> f64 {
        self.with(|s| {
            s.position_queries += 1;
            s.position
        })
    }

    fn duration(&self) -> f64 {
        self.with(|s| s.duration)
    }

    fn player_state(&self) -> EmbedPlayerState {
        self.with(|s| s.state)
    }

    fn destroy(&mut self) {
        self.with(|s| s.destroyed = true);
    }
}

/// Embed host whose players report `Ready` as soon as they are created.
#[derive(Default)]
pub struct FakeEmbedHost {
    players: Mutex<Vec<(EmbedPlayerSpec, Arc<Mutex<FakePlayerState>>)>>,
}

impl FakeEmbedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.players.lock().expect("fake host poisoned").len()
    }

    pub fn last_spec(&self) -> Option<EmbedPlayerSpec> {
        self.players
            .lock()
            .expect("fake host poisoned")
            .last()
            .map(|(spec, _)| spec.clone())
    }

    pub fn player_state(&self) -> FakePlayerState {
        self.last_player()
            .map(|state| state.lock().expect("fake player poisoned").clone())
            .unwrap_or_default()
    }

    pub fn set_position(&self, seconds: f64) {
        if let Some(state) = self.last_player() {
            state.lock().expect("fake player poisoned").position = seconds;
        }
    }

    pub fn set_state(&self, player_state: EmbedPlayerState) {
        if let Some(state) = self.last_player() {
            state.lock().expect("fake player poisoned").state = player_state;
        }
    }

    fn last_player(&self) -> Option<Arc<Mutex<FakePlayerState>>> {
        self.players
            .lock()
            .expect("fake host poisoned")
            .last()
            .map(|(_, state)| Arc::clone(state))
    }
}

impl EmbedHost for FakeEmbedHost {
    fn create_player(
        &self,
        spec: &EmbedPlayerSpec,
        events: EmbedEventSink,
    ) -> Result<Box<dyn EmbeddedPlayer>, String> {
        let state = Arc::new(Mutex::new(FakePlayerState::default()));
        let duration = state.lock().expect("fake player poisoned").duration;
        self.players
            .lock()
            .expect("fake host poisoned")
            .push((spec.clone(), Arc::clone(&state)));
        events.dispatch(EmbedPlayerEvent::Ready {
            duration_seconds: duration,
        });
        Ok(Box::new(FakeEmbeddedPlayer { state }))
    }
}

// ============================================================================
// Script injection
// ============================================================================

/// Records injections and keeps the notifiers for the test to resolve.
#[derive(Default)]
pub struct CountingInjector {
    requests: Mutex<Vec<ScriptRequest>>,
    pending: Mutex<HashMap<EmbedTechnology, Vec<ReadyNotifier>>>,
    fail_with: Option<String>,
}

impl CountingInjector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Injector whose every injection fails synchronously.
    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        })
    }

    pub fn requests(&self, technology: EmbedTechnology) -> usize {
        self.requests
            .lock()
            .expect("injector poisoned")
            .iter()
            .filter(|r| r.technology == technology)
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().expect("injector poisoned").len()
    }

    pub fn last_url(&self, technology: EmbedTechnology) -> Option<String> {
        self.requests
            .lock()
            .expect("injector poisoned")
            .iter()
            .rev()
            .find(|r| r.technology == technology)
            .map(|r| r.url.clone())
    }

    /// Resolves every pending load of `technology` as ready.
    pub fn resolve_ready(&self, technology: EmbedTechnology) -> bool {
        let notifiers = self.take_pending(technology);
        let resolved = !notifiers.is_empty();
        for notifier in notifiers {
            notifier.ready();
        }
        resolved
    }

    pub fn resolve_failed(&self, technology: EmbedTechnology, reason: &str) -> bool {
        let notifiers = self.take_pending(technology);
        let resolved = !notifiers.is_empty();
        for notifier in notifiers {
            notifier.failed(reason);
        }
        resolved
    }

    fn take_pending(&self, technology: EmbedTechnology) -> Vec<ReadyNotifier> {
        self.pending
            .lock()
            .expect("injector poisoned")
            .remove(&technology)
            .unwrap_or_default()
    }
}

impl ScriptInjector for CountingInjector {
    fn inject(&self, request: &ScriptRequest, notifier: ReadyNotifier) -> Result<(), String> {
        self.requests
            .lock()
            .expect("injector poisoned")
            .push(request.clone());
        if let Some(reason) = &self.fail_with {
            return Err(reason.clone());
        }
        self.pending
            .lock()
            .expect("injector poisoned")
            .entry(request.technology)
            .or_default()
            .push(notifier);
        Ok(())
    }
}

// ============================================================================
// Progress sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<ProgressUpdate>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().expect("sink poisoned").clone()
    }

    pub fn positions(&self) -> Vec<f64> {
        self.updates().iter().map(|u| u.position_seconds).collect()
    }

    pub fn completions(&self) -> usize {
        self.updates().iter().filter(|u| u.completed).count()
    }

    /// Makes the next write fail with `reason`.
    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().expect("sink poisoned") = Some(reason.to_string());
    }
}

impl ProgressSink for RecordingSink {
    fn write(&self, update: &ProgressUpdate) -> Result<()> {
        if let Some(reason) = self.fail_next.lock().expect("sink poisoned").take() {
            return Err(anyhow!(reason));
        }
        self.updates
            .lock()
            .expect("sink poisoned")
            .push(update.clone());
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// A full set of fakes wired into [`StandardBackends`].
pub struct Rig {
    pub media: Arc<FakeMediaFactory>,
    pub host: Arc<FakeEmbedHost>,
    pub injector: Arc<CountingInjector>,
    pub bootstrap: Arc<ScriptBootstrap>,
    pub sink: Arc<RecordingSink>,
    pub clock: ManualClock,
    backends: Arc<StandardBackends>,
}

impl Rig {
    pub fn new() -> Self {
        let media = FakeMediaFactory::new();
        let host = FakeEmbedHost::new();
        let injector = CountingInjector::new();
        let bootstrap = Arc::new(ScriptBootstrap::new(injector.clone()));
        let backends = Arc::new(StandardBackends::new(
            media.clone(),
            host.clone(),
            Arc::clone(&bootstrap),
        ));
        Self {
            media,
            host,
            injector,
            bootstrap,
            sink: RecordingSink::new(),
            clock: ManualClock::new(),
            backends,
        }
    }

    pub fn backends(&self) -> Arc<StandardBackends> {
        Arc::clone(&self.backends)
    }

    /// A controller sharing this rig's fakes, bootstrap and clock.
    pub fn controller(&self) -> PlaybackController {
        PlaybackController::with_clock(
            self.backends(),
            self.sink.clone(),
            ControllerSettings::default(),
            Arc::new(self.clock.clone()),
        )
    }
}
