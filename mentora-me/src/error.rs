//! Error types for mentora-me

use mentora_core::Error as CoreError;
use mentora_spk::SpeechError;
use thiserror::Error;

/// Avatar interaction errors
#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("Renderer not ready")]
    RendererNotReady,

    #[error("Gesture execution failed: {0}")]
    GestureExecution(String),

    #[error("Unknown gesture: {0}")]
    UnknownGesture(String),

    #[error("Renderer error: {0}")]
    Renderer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Speech error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<AvatarError> for CoreError {
    fn from(err: AvatarError) -> Self {
        CoreError::Avatar(err.to_string())
    }
}
