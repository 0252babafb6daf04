//! Configuration for speech synchronization and audio arbitration

use mentora_core::EnvOverrides;
use serde::{Deserialize, Serialize};

/// Speech synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Speak streamed assistant messages automatically
    pub auto_speak: bool,

    /// Accumulated characters required before speech may start early (default 10)
    pub progressive_start_chars: usize,

    /// Grace period after the threshold is crossed before speech starts (ms)
    pub start_grace_ms: u64,

    /// Upper bound on accumulated text per message (chars)
    pub max_text_chars: usize,

    /// Voice settings passed to the backend
    pub voice: VoiceOptions,

    /// Audio arbiter settings
    pub arbiter: ArbiterConfig,
}

/// Voice options forwarded to the speech backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceOptions {
    /// Voice name/identifier
    pub name: Option<String>,

    /// Language code (e.g., "en-US")
    pub language: String,

    /// Rate multiplier (0.1-4.0, default 1.0)
    pub rate: f32,

    /// Pitch multiplier (0.0-2.0, default 1.0)
    pub pitch: f32,

    /// Volume (0.0-1.0, default 1.0)
    pub volume: f32,
}

/// Audio arbiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// How many times pending audio operations are cancelled on teardown
    pub cancel_passes: u32,

    /// Delay after teardown before the device may be re-acquired (ms)
    pub settle_delay_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            auto_speak: true,
            progressive_start_chars: 10,
            start_grace_ms: 250,
            max_text_chars: 100_000,
            voice: VoiceOptions::default(),
            arbiter: ArbiterConfig::default(),
        }
    }
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            name: None,
            language: "en-US".to_string(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            cancel_passes: 2,
            settle_delay_ms: 150,
        }
    }
}

impl VoiceOptions {
    /// Validate voice options
    pub fn validate(&self) -> Result<(), String> {
        if self.language.is_empty() {
            return Err("Language code cannot be empty".to_string());
        }

        if self.language.len() > 32 {
            return Err("Language code too long (max 32 chars)".to_string());
        }

        if !self.language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err("Language code contains invalid characters (only alphanumeric and '-' allowed)".to_string());
        }

        if let Some(ref name) = self.name {
            if name.is_empty() {
                return Err("Voice name cannot be empty if provided".to_string());
            }
            if name.len() > 256 {
                return Err("Voice name too long (max 256 chars)".to_string());
            }
            if name.chars().any(|c| c == '\0' || c.is_control()) {
                return Err("Voice name contains invalid characters".to_string());
            }
        }

        if !(0.1..=4.0).contains(&self.rate) {
            return Err("Rate must be between 0.1 and 4.0".to_string());
        }

        if !(0.0..=2.0).contains(&self.pitch) {
            return Err("Pitch must be between 0.0 and 2.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.volume) {
            return Err("Volume must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

impl ArbiterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cancel_passes == 0 {
            return Err("Cancel passes must be at least 1".to_string());
        }
        if self.cancel_passes > 10 {
            return Err("Cancel passes too large (max 10)".to_string());
        }
        if self.settle_delay_ms > 5_000 {
            return Err("Settle delay too large (max 5000 ms)".to_string());
        }
        Ok(())
    }
}

impl SpeechConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.progressive_start_chars == 0 {
            return Err("Progressive start threshold must be greater than 0".to_string());
        }

        if self.progressive_start_chars > self.max_text_chars {
            return Err("Progressive start threshold cannot exceed max text length".to_string());
        }

        if self.start_grace_ms > 10_000 {
            return Err("Start grace period too large (max 10000 ms)".to_string());
        }

        if self.max_text_chars > 1_000_000 {
            return Err("Max text length too large (max 1000000 chars)".to_string());
        }

        self.voice.validate()?;
        self.arbiter.validate()?;

        Ok(())
    }

    /// Apply `MENTORA_SPEECH_*` style overrides
    pub fn apply_env(&mut self, env: &EnvOverrides) {
        env.apply("speech_auto_speak", &mut self.auto_speak);
        env.apply("speech_start_chars", &mut self.progressive_start_chars);
        env.apply("speech_start_grace_ms", &mut self.start_grace_ms);
        env.apply("speech_language", &mut self.voice.language);
        env.apply("speech_rate", &mut self.voice.rate);
        env.apply("audio_settle_delay_ms", &mut self.arbiter.settle_delay_ms);
    }
}
