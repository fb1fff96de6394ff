use thiserror::Error;

use crate::model::PlaybackStatus;

/// Why a backend could not reach `Ready`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadFailure {
    #[error("external script failed to load: {0}")]
    ScriptLoad(String),
    #[error("media failed to load: {0}")]
    MediaLoad(String),
    #[error("embedded player could not be created: {0}")]
    PlayerCreation(String),
    #[error("embedded player reported error {code}: {message}")]
    EmbeddedPlayer { code: i32, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Invalid media source: {0}")]
    SourceValidation(String),
    #[error("Backend load failed: {0}")]
    BackendLoad(LoadFailure),
    #[error("Playback rejected by runtime: {0}")]
    PlaybackRejected(String),
    #[error("Command '{command}' is not valid while {status}")]
    CommandInInvalidState {
        command: String,
        status: PlaybackStatus,
    },
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Playback rate {0} is not allowed")]
    UnsupportedRate(f64),
    #[error("Operation '{0}' is not supported by backend '{1}'")]
    CapabilityUnsupported(String, String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Playback fault: {0}")]
    Fault(String),
}

impl PlaybackError {
    pub fn source_validation(message: &str) -> Self {
        PlaybackError::SourceValidation(message.to_string())
    }

    pub fn invalid_state(command: &str, status: PlaybackStatus) -> Self {
        PlaybackError::CommandInInvalidState {
            command: command.to_string(),
            status,
        }
    }

    pub fn capability_unsupported(operation: &str, backend: &str) -> Self {
        PlaybackError::CapabilityUnsupported(operation.to_string(), backend.to_string())
    }

    pub fn script_load(reason: &str) -> Self {
        PlaybackError::BackendLoad(LoadFailure::ScriptLoad(reason.to_string()))
    }

    pub fn media_load(reason: &str) -> Self {
        PlaybackError::BackendLoad(LoadFailure::MediaLoad(reason.to_string()))
    }
}
