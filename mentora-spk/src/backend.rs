//! Speech backend abstraction

use crate::config::VoiceOptions;
use crate::error::SpeechError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle notifications for a single utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtteranceEvent {
    Started,
    Ended,
    Error(String),
}

/// Receiving side of an utterance, handed back from `SpeechBackend::speak`
#[derive(Debug)]
pub struct Utterance {
    events: mpsc::UnboundedReceiver<UtteranceEvent>,
}

/// Sending side of an utterance, kept by the backend while audio plays
#[derive(Debug, Clone)]
pub struct UtteranceHandle {
    events: mpsc::UnboundedSender<UtteranceEvent>,
}

impl Utterance {
    /// Create a connected handle/utterance pair
    pub fn channel() -> (UtteranceHandle, Utterance) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UtteranceHandle { events: tx }, Utterance { events: rx })
    }

    /// Next lifecycle event, `None` once the backend dropped its handle
    pub async fn next_event(&mut self) -> Option<UtteranceEvent> {
        self.events.recv().await
    }

    /// Wait until the utterance ends.
    ///
    /// A backend that drops its handle without reporting `Ended` (e.g. after
    /// `stop()`) is treated as a normal end.
    pub async fn wait(mut self) -> Result<(), SpeechError> {
        while let Some(event) = self.events.recv().await {
            match event {
                UtteranceEvent::Started => debug!("Utterance started"),
                UtteranceEvent::Ended => return Ok(()),
                UtteranceEvent::Error(e) => return Err(SpeechError::Backend(e)),
            }
        }
        Ok(())
    }
}

impl UtteranceHandle {
    pub fn started(&self) {
        let _ = self.events.send(UtteranceEvent::Started);
    }

    pub fn ended(&self) {
        let _ = self.events.send(UtteranceEvent::Ended);
    }

    pub fn failed(&self, message: impl Into<String>) {
        let _ = self.events.send(UtteranceEvent::Error(message.into()));
    }
}

/// Trait for text-to-speech playback backends
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Begin speaking `text`; lifecycle is reported through the returned utterance
    async fn speak(&self, text: &str, voice: &VoiceOptions) -> Result<Utterance, SpeechError>;

    /// Stop any current utterance
    async fn stop(&self) -> Result<(), SpeechError>;

    /// Whether audio is currently playing
    fn is_speaking(&self) -> bool;

    /// Backend name for logs
    fn name(&self) -> &str;
}
