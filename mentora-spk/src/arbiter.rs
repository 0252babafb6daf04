//! Preemptive audio arbiter
//!
//! The character renderer's own audio and the speech backend both assume they
//! own the output device. The arbiter grants the device to one producer at a
//! time and tears the other one down before handing it over.

use crate::backend::SpeechBackend;
use crate::config::ArbiterConfig;
use crate::error::SpeechError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The two producers competing for the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioProducer {
    /// The character renderer's internal audio channel
    CharacterAudio,
    /// The external speech-synthesis channel
    SpeechSynthesis,
}

impl AudioProducer {
    pub fn other(self) -> Self {
        match self {
            AudioProducer::CharacterAudio => AudioProducer::SpeechSynthesis,
            AudioProducer::SpeechSynthesis => AudioProducer::CharacterAudio,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioProducer::CharacterAudio => "character-audio",
            AudioProducer::SpeechSynthesis => "speech-synthesis",
        }
    }
}

impl fmt::Display for AudioProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control surface the arbiter uses to silence a producer
#[async_trait]
pub trait AudioChannel: Send + Sync {
    /// Cancel queued or playing audio operations
    async fn cancel_pending(&self) -> Result<(), SpeechError>;

    /// Release any owned audio context / graph
    async fn teardown(&self) -> Result<(), SpeechError>;
}

/// `AudioChannel` over a speech backend: cancelling stops the utterance
pub struct BackendAudioChannel {
    backend: Arc<dyn SpeechBackend>,
}

impl BackendAudioChannel {
    pub fn new(backend: Arc<dyn SpeechBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AudioChannel for BackendAudioChannel {
    async fn cancel_pending(&self) -> Result<(), SpeechError> {
        self.backend.stop().await
    }

    async fn teardown(&self) -> Result<(), SpeechError> {
        Ok(())
    }
}

/// How many times each producer has lost the device to the other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revocations {
    pub character_audio: u64,
    pub speech_synthesis: u64,
}

impl Revocations {
    pub fn count(&self, producer: AudioProducer) -> u64 {
        match producer {
            AudioProducer::CharacterAudio => self.character_audio,
            AudioProducer::SpeechSynthesis => self.speech_synthesis,
        }
    }

    fn bump(&mut self, producer: AudioProducer) {
        match producer {
            AudioProducer::CharacterAudio => self.character_audio += 1,
            AudioProducer::SpeechSynthesis => self.speech_synthesis += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Free,
    Held(AudioProducer),
    Transitioning,
}

/// Resets the phase when a teardown finishes or its future is dropped
struct Transition<'a> {
    phase: &'a Mutex<Phase>,
    target: Phase,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = self.target;
    }
}

/// Grants exclusive, preemptive access to the audio output device
pub struct AudioArbiter {
    config: ArbiterConfig,
    character: Arc<dyn AudioChannel>,
    speech: Arc<dyn AudioChannel>,
    phase: Mutex<Phase>,
    revocations: watch::Sender<Revocations>,
}

impl AudioArbiter {
    pub fn new(
        config: ArbiterConfig,
        character: Arc<dyn AudioChannel>,
        speech: Arc<dyn AudioChannel>,
    ) -> Result<Self, SpeechError> {
        config.validate().map_err(SpeechError::Config)?;
        Ok(Self {
            config,
            character,
            speech,
            phase: Mutex::new(Phase::Free),
            revocations: watch::channel(Revocations::default()).0,
        })
    }

    /// Request the device for `producer`.
    ///
    /// If the other producer holds it, its session is torn down first. Returns
    /// `false` while another teardown is still in flight.
    pub async fn request_access(&self, producer: AudioProducer) -> bool {
        self.request_grant(producer).await.is_some()
    }

    /// Like `request_access`, but returns the producer's revocation count at
    /// grant time. The grant stays valid while that count is unchanged.
    pub async fn request_grant(&self, producer: AudioProducer) -> Option<u64> {
        let (revoke, grant) = {
            let mut phase = self.phase.lock();
            let grant = self.revocations.borrow().count(producer);
            match *phase {
                Phase::Held(holder) if holder == producer => return Some(grant),
                Phase::Free => {
                    *phase = Phase::Held(producer);
                    debug!("Audio granted to {}", producer);
                    return Some(grant);
                }
                Phase::Transitioning => {
                    debug!("Audio request from {} denied: teardown in progress", producer);
                    return None;
                }
                Phase::Held(holder) => {
                    *phase = Phase::Transitioning;
                    // the revoked holder learns about it before its audio is cut
                    self.revocations.send_modify(|r| r.bump(holder));
                    (holder, grant)
                }
            }
        };

        info!("Revoking {} audio to grant {}", revoke, producer);
        let mut transition = Transition {
            phase: &self.phase,
            target: Phase::Free,
        };
        self.teardown(revoke).await;
        transition.target = Phase::Held(producer);
        Some(grant)
    }

    /// Like `request_access`, but maps a denial to `AudioAccessDenied`
    pub async fn require_access(&self, producer: AudioProducer) -> Result<(), SpeechError> {
        if self.request_access(producer).await {
            Ok(())
        } else {
            Err(SpeechError::AudioAccessDenied(producer))
        }
    }

    /// Release the device held by `producer`; ignored if it is not the holder
    pub async fn release_access(&self, producer: AudioProducer) {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Held(producer) {
                debug!("Ignoring audio release from {} (not the holder)", producer);
                return;
            }
            *phase = Phase::Transitioning;
        }

        let _transition = Transition {
            phase: &self.phase,
            target: Phase::Free,
        };
        self.teardown(producer).await;
        debug!("Audio released by {}", producer);
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<AudioProducer> {
        match *self.phase.lock() {
            Phase::Held(producer) => Some(producer),
            _ => None,
        }
    }

    /// Revocation counters, updated whenever a holder is preempted
    pub fn subscribe_revocations(&self) -> watch::Receiver<Revocations> {
        self.revocations.subscribe()
    }

    pub fn revocation_count(&self, producer: AudioProducer) -> u64 {
        self.revocations.borrow().count(producer)
    }

    pub fn is_transitioning(&self) -> bool {
        *self.phase.lock() == Phase::Transitioning
    }

    fn channel(&self, producer: AudioProducer) -> &Arc<dyn AudioChannel> {
        match producer {
            AudioProducer::CharacterAudio => &self.character,
            AudioProducer::SpeechSynthesis => &self.speech,
        }
    }

    // cancel (repeated), teardown, settle
    async fn teardown(&self, producer: AudioProducer) {
        let channel = Arc::clone(self.channel(producer));
        for pass in 0..self.config.cancel_passes {
            if let Err(e) = channel.cancel_pending().await {
                warn!("Cancel pass {} for {} failed: {}", pass + 1, producer, e);
            }
        }
        if let Err(e) = channel.teardown().await {
            warn!("Audio teardown for {} failed: {}", producer, e);
        }
        if self.config.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }
    }
}
