//! Character renderer boundary

use crate::error::AvatarError;
use async_trait::async_trait;
use mentora_spk::{AudioChannel, SpeechError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Normalized pointer position over the character canvas (0.0..=1.0 on both axes)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }

    /// Look-at target in renderer space (-1.0..=1.0, origin at center)
    pub fn to_look_target(self) -> (f64, f64) {
        (self.x * 2.0 - 1.0, 1.0 - self.y * 2.0)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoverPhase {
    Enter,
    Leave,
}

/// Trait for character renderers
#[async_trait]
pub trait CharacterRenderer: Send + Sync {
    async fn play_gesture(
        &self,
        name: &str,
        duration_secs: f64,
        mirror: bool,
        transition_ms: u64,
    ) -> Result<(), AvatarError>;
    async fn set_mood(&self, mood: &str) -> Result<(), AvatarError>;
    async fn look_at(&self, x: f64, y: f64, duration_ms: u64) -> Result<(), AvatarError>;

    /// Cancel any sound the character itself is producing
    async fn stop_audio(&self) -> Result<(), AvatarError> {
        Ok(())
    }

    /// Release the renderer's audio context
    async fn release_audio_context(&self) -> Result<(), AvatarError> {
        Ok(())
    }

    fn renderer_name(&self) -> &str;
}

/// Exposes a renderer's audio to the arbiter as the `CharacterAudio` channel
pub struct RendererAudioChannel {
    renderer: Arc<dyn CharacterRenderer>,
}

impl RendererAudioChannel {
    pub fn new(renderer: Arc<dyn CharacterRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl AudioChannel for RendererAudioChannel {
    async fn cancel_pending(&self) -> Result<(), SpeechError> {
        self.renderer
            .stop_audio()
            .await
            .map_err(|e| SpeechError::Backend(format!("{}: {}", self.renderer.renderer_name(), e)))
    }

    async fn teardown(&self) -> Result<(), SpeechError> {
        self.renderer
            .release_audio_context()
            .await
            .map_err(|e| SpeechError::Backend(format!("{}: {}", self.renderer.renderer_name(), e)))
    }
}
