//! Legal status transitions.
//!
//! `next_status` is the only place that decides whether a trigger moves the
//! controller to another status; everything else asks it.

use crate::model::PlaybackStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    Initialize,
    MetadataLoaded,
    LoadFailed,
    SourceInvalid,
    /// `play()` command or backend "started playing".
    Started,
    /// `pause()` command or backend "paused".
    Paused,
    BackendEnded,
    CompletionReached,
    Fault,
    Teardown,
}

impl Trigger {
    pub const ALL: [Trigger; 10] = [
        Trigger::Initialize,
        Trigger::MetadataLoaded,
        Trigger::LoadFailed,
        Trigger::SourceInvalid,
        Trigger::Started,
        Trigger::Paused,
        Trigger::BackendEnded,
        Trigger::CompletionReached,
        Trigger::Fault,
        Trigger::Teardown,
    ];
}

/// Returns the status reached from `from` on `trigger`, or `None` when the
/// pair is not a transition.
pub fn next_status(from: PlaybackStatus, trigger: Trigger) -> Option<PlaybackStatus> {
    use PlaybackStatus::*;

    match (from, trigger) {
        (_, Trigger::Initialize) => Some(Loading),
        (_, Trigger::Teardown) => Some(Idle),
        (Loading, Trigger::MetadataLoaded) => Some(Ready),
        (Loading, Trigger::LoadFailed | Trigger::SourceInvalid) => Some(Errored),
        (Ready | Paused, Trigger::Started) => Some(Playing),
        (Playing, Trigger::Paused) => Some(Paused),
        (Playing, Trigger::BackendEnded | Trigger::CompletionReached) => Some(Ended),
        (Loading | Ready | Playing | Paused | Ended, Trigger::Fault) => Some(Errored),
        _ => None,
    }
}
