//! Playback backends.
//!
//! [`MediaBackend`] wraps every supported technology (direct media file and
//! the embedded YouTube / Vimeo players) behind the capability traits of
//! [`capabilities`]. The controller only ever talks to a `MediaBackend`, and
//! backends only ever talk back through a [`SignalSink`].

pub mod bootstrap;
pub mod capabilities;
pub mod embedded;
pub mod native;
pub mod watcher;

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::debug;

pub use crate::backend::capabilities::{
    BackendCapabilities, BackendState, MediaBackendAdapter, PlaybackProbe, RateControl,
    TransportControl, VolumeControl,
};
use crate::backend::bootstrap::ScriptBootstrap;
use crate::backend::embedded::{EmbedHost, EmbeddedPlayerBackend};
use crate::backend::native::{MediaElementFactory, NativeMediaBackend};
use crate::errors::PlaybackError;
use crate::model::MediaKind;
use crate::source::ResolvedSource;

/// Backend-originated notification, already translated from the technology's
/// own event vocabulary.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendSignal {
    MetadataLoaded { duration_seconds: f64 },
    DurationChanged { duration_seconds: f64 },
    TimeUpdate { position_seconds: f64 },
    Started,
    Paused,
    Ended,
    Buffering,
    LoadFailed(PlaybackError),
    Fault(PlaybackError),
}

/// A signal tagged with the session that produced it.
#[derive(Clone, Debug)]
pub struct SessionSignal {
    pub session: u64,
    pub signal: BackendSignal,
}

/// Where a backend sends its signals.
///
/// Every sink is bound to one session token; the controller drops signals
/// whose token is no longer current.
#[derive(Clone, Debug)]
pub struct SignalSink {
    session: u64,
    tx: Sender<SessionSignal>,
}

impl SignalSink {
    pub fn new(session: u64, tx: Sender<SessionSignal>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns false once the owning controller is gone.
    pub fn emit(&self, signal: BackendSignal) -> bool {
        let sent = self
            .tx
            .send(SessionSignal {
                session: self.session,
                signal,
            })
            .is_ok();
        if !sent {
            debug!(session = self.session, "Signal dropped, controller is gone");
        }
        sent
    }
}

/// Content protection applied to every backend.
///
/// The embedded technology's own interface is never interactive; all input
/// flows through the control surface and the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtectionPolicy {
    pub hide_native_controls: bool,
    pub block_context_menu: bool,
    pub block_download: bool,
    pub block_picture_in_picture: bool,
    pub interactive_embed: bool,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            hide_native_controls: true,
            block_context_menu: true,
            block_download: true,
            block_picture_in_picture: true,
            interactive_embed: false,
        }
    }
}

/// Tagged variant over the supported technologies.
#[derive(Debug)]
pub enum MediaBackend {
    /// Direct media file played by a host media element.
    Native(NativeMediaBackend),
    /// YouTube or Vimeo player loaded through the embed API.
    Embedded(EmbeddedPlayerBackend),
}

impl TransportControl for MediaBackend {
    fn play(&mut self) -> Result<(), PlaybackError> {
        match self {
            MediaBackend::Native(native) => native.play(),
            MediaBackend::Embedded(embedded) => embedded.play(),
        }
    }

    fn pause(&mut self) {
        match self {
            MediaBackend::Native(native) => native.pause(),
            MediaBackend::Embedded(embedded) => embedded.pause(),
        }
    }

    fn seek_to(&mut self, seconds: f64) {
        match self {
            MediaBackend::Native(native) => native.seek_to(seconds),
            MediaBackend::Embedded(embedded) => embedded.seek_to(seconds),
        }
    }
}

impl VolumeControl for MediaBackend {
    fn set_volume(&mut self, volume: f64) {
        match self {
            MediaBackend::Native(native) => native.set_volume(volume),
            MediaBackend::Embedded(embedded) => embedded.set_volume(volume),
        }
    }

    fn set_muted(&mut self, muted: bool) {
        match self {
            MediaBackend::Native(native) => native.set_muted(muted),
            MediaBackend::Embedded(embedded) => embedded.set_muted(muted),
        }
    }
}

impl RateControl for MediaBackend {
    fn set_rate(&mut self, rate: f64) {
        match self {
            MediaBackend::Native(native) => native.set_rate(rate),
            MediaBackend::Embedded(embedded) => embedded.set_rate(rate),
        }
    }
}

impl PlaybackProbe for MediaBackend {
    fn position(&self) -> f64 {
        match self {
            MediaBackend::Native(native) => native.position(),
            MediaBackend::Embedded(embedded) => embedded.position(),
        }
    }

    fn duration(&self) -> f64 {
        match self {
            MediaBackend::Native(native) => native.duration(),
            MediaBackend::Embedded(embedded) => embedded.duration(),
        }
    }

    fn state(&self) -> BackendState {
        match self {
            MediaBackend::Native(native) => native.state(),
            MediaBackend::Embedded(embedded) => embedded.state(),
        }
    }
}

impl MediaBackendAdapter for MediaBackend {
    fn on_event(&mut self, sink: SignalSink) {
        match self {
            MediaBackend::Native(native) => native.on_event(sink),
            MediaBackend::Embedded(embedded) => embedded.on_event(sink),
        }
    }

    fn load(&mut self, source: &ResolvedSource) -> Result<(), PlaybackError> {
        match self {
            MediaBackend::Native(native) => native.load(source),
            MediaBackend::Embedded(embedded) => embedded.load(source),
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        match self {
            MediaBackend::Native(native) => native.capabilities(),
            MediaBackend::Embedded(embedded) => embedded.capabilities(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            MediaBackend::Native(native) => native.name(),
            MediaBackend::Embedded(embedded) => embedded.name(),
        }
    }

    fn dispose(&mut self) {
        match self {
            MediaBackend::Native(native) => native.dispose(),
            MediaBackend::Embedded(embedded) => embedded.dispose(),
        }
    }
}

/// Builds the backend matching a source's kind.
pub trait BackendProvider: Send + Sync {
    fn create(&self, source: &ResolvedSource) -> Result<MediaBackend, PlaybackError>;
}

/// The stock provider: host media elements for native files, the host embed
/// API (behind a shared script bootstrap) for YouTube and Vimeo.
#[derive(Clone)]
pub struct StandardBackends {
    media: Arc<dyn MediaElementFactory>,
    embed_host: Arc<dyn EmbedHost>,
    bootstrap: Arc<ScriptBootstrap>,
    protection: ProtectionPolicy,
}

impl StandardBackends {
    pub fn new(
        media: Arc<dyn MediaElementFactory>,
        embed_host: Arc<dyn EmbedHost>,
        bootstrap: Arc<ScriptBootstrap>,
    ) -> Self {
        Self {
            media,
            embed_host,
            bootstrap,
            protection: ProtectionPolicy::default(),
        }
    }

    pub fn with_protection(mut self, protection: ProtectionPolicy) -> Self {
        self.protection = protection;
        self
    }

    pub fn bootstrap(&self) -> &Arc<ScriptBootstrap> {
        &self.bootstrap
    }
}

impl BackendProvider for StandardBackends {
    fn create(&self, source: &ResolvedSource) -> Result<MediaBackend, PlaybackError> {
        match source.kind() {
            MediaKind::NativeFile => {
                let element = self.media.create_element().map_err(|reason| {
                    PlaybackError::media_load(&format!("cannot create media element: {reason}"))
                })?;
                Ok(MediaBackend::Native(NativeMediaBackend::new(
                    element,
                    self.protection,
                )))
            }
            MediaKind::EmbeddedYouTube | MediaKind::EmbeddedVimeo => {
                let technology = source.technology().ok_or_else(|| {
                    PlaybackError::source_validation("embedded source without technology")
                })?;
                Ok(MediaBackend::Embedded(EmbeddedPlayerBackend::new(
                    technology,
                    Arc::clone(&self.embed_host),
                    Arc::clone(&self.bootstrap),
                    self.protection,
                )))
            }
        }
    }
}
