//! mentora-spk: speech side of the avatar engine
//!
//! Provides:
//! - An abstract speech backend (`SpeechBackend`) with utterance lifecycle events
//! - A preemptive audio arbiter shared by character audio and speech playback
//! - Progressive speech synchronization for streaming assistant messages
//! - Configurable thresholds and voice options

pub mod error;
pub mod config;
pub mod backend;
pub mod arbiter;
pub mod synchronizer;

pub use error::SpeechError;
pub use config::{ArbiterConfig, SpeechConfig, VoiceOptions};
pub use backend::{SpeechBackend, Utterance, UtteranceEvent, UtteranceHandle};
pub use arbiter::{AudioArbiter, AudioChannel, AudioProducer, BackendAudioChannel, Revocations};
pub use synchronizer::{MessageId, ProgressiveSpeechSynchronizer, SpeechEvent};
