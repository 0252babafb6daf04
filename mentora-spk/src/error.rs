//! Error types for mentora-spk

use crate::arbiter::AudioProducer;
use mentora_core::Error as CoreError;
use thiserror::Error;

/// Speech pipeline errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Speech backend error: {0}")]
    Backend(String),

    #[error("Audio access denied for {0}")]
    AudioAccessDenied(AudioProducer),

    #[error("Synchronizer error: {0}")]
    Synchronizer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<SpeechError> for CoreError {
    fn from(err: SpeechError) -> Self {
        CoreError::Speech(err.to_string())
    }
}
