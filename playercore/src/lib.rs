//! Unified lesson video playback core.
//!
//! One [`PlaybackController`] owns the playback state machine and drives a
//! pluggable [`MediaBackend`] (direct media file or embedded third-party
//! player). Position updates from either backend are normalized into
//! [`ProgressSample`]s and forwarded to a throttled [`ProgressReporter`];
//! every state change, warning and error is published on one
//! [`PlaybackEvent`] stream.

mod events;

pub mod backend;
pub mod clock;
pub mod control_surface;
pub mod controller;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod model;
pub mod reporter;
pub mod source;
pub mod state_machine;
pub mod time_utils;

#[cfg(test)]
mod testing;

pub use backend::{
    BackendCapabilities, BackendProvider, BackendSignal, BackendState, MediaBackend,
    MediaBackendAdapter, ProtectionPolicy, SignalSink, StandardBackends,
};
pub use backend::bootstrap::{ReadyNotifier, ScriptBootstrap, ScriptInjector, ScriptRequest};
pub use backend::embedded::{
    EmbedEventSink, EmbedHost, EmbedPlayerEvent, EmbedPlayerSpec, EmbedPlayerState,
    EmbeddedPlayer, EmbeddedPlayerBackend,
};
pub use backend::native::{
    MediaElement, MediaElementEvent, MediaElementFactory, MediaElementListener,
    NativeMediaBackend,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use control_surface::{ControlSurface, Gesture, SurfaceView};
pub use controller::{ControllerSettings, PlaybackController};
pub use driver::PlaybackDriver;
pub use errors::{LoadFailure, PlaybackError};
pub use events::PlaybackEventBus;
pub use model::{
    Command, CommandOutcome, CompletionPolicy, EmbedTechnology, MediaKind,
    PlaybackEvent, PlaybackEventKind, PlaybackSnapshot, PlaybackState, PlaybackStatus, PlayerId,
    ProgressSample,
};
pub use reporter::{ChannelProgressSink, ProgressReporter, ProgressSink, ProgressUpdate};
pub use source::{MediaSource, ResolvedSource};
