//! Configuration for the avatar engine

use crate::error::AvatarError;
use crate::state_machine::AvatarState;
use mentora_core::EnvOverrides;
use mentora_spk::SpeechConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_GESTURES: &[&str] = &[
    "idle",
    "wave",
    "nod",
    "shake_head",
    "point",
    "thinking",
    "explain",
    "celebrate",
    "uncertain",
    "listen",
    "shrug",
    "thumbs_up",
    "look_around",
    "hand_up",
    "talk",
    "bow",
];

/// Complete engine configuration (avatar + speech)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub avatar: AvatarConfig,
    pub speech: SpeechConfig,
}

/// Avatar configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub gestures: GestureConfig,
    pub interaction: InteractionConfig,
    pub analyzer: AnalyzerConfig,
    pub analytics: AnalyticsConfig,
}

/// Gesture scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Maximum queued (not playing) gestures (default 5)
    pub max_queue_size: usize,

    /// Default gesture duration in seconds
    pub default_duration_secs: f64,

    /// Default blend/transition time in milliseconds
    pub default_transition_ms: u64,

    /// Upper bound on a single renderer `play_gesture` call (ms)
    pub play_timeout_ms: u64,

    /// Gestures the renderer knows; empty accepts any name
    pub catalog: Vec<String>,

    /// Played instead of unknown gesture names
    pub fallback_gesture: String,
}

/// Per-state enter behavior
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateBehavior {
    /// Mood applied when the state is entered
    pub mood: Option<String>,

    /// Micro-gestures cycled while the state is active
    pub micro_gestures: Vec<String>,

    /// Period of the micro-gesture timer (0 disables it)
    pub interval_ms: u64,
}

/// Interaction state machine and UI event configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Quiet period after the last keystroke before `UserWriting` clears (ms)
    pub typing_debounce_ms: u64,

    pub idle: StateBehavior,
    pub listening: StateBehavior,
    pub thinking: StateBehavior,
    pub speaking: StateBehavior,
    pub user_writing: StateBehavior,

    /// Gesture played when the character is clicked
    pub click_gesture: String,

    /// Gesture played on a short touch
    pub touch_gesture: String,

    /// Gesture played on a long press
    pub long_press_gesture: String,

    /// Touch duration that counts as a long press (ms)
    pub long_press_ms: u64,

    /// Duration of look-at moves triggered by pointer events (ms)
    pub look_at_ms: u64,
}

/// Content analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Domain matches must exceed this confidence to win over sentiment
    pub acceptance_threshold: f64,

    /// Highest confidence ever reported
    pub confidence_cap: f64,

    /// Gesture forced when confusion meets domain vocabulary
    pub uncertain_gesture: String,

    /// Additional domain keyword -> gesture entries
    pub extra_domain_keywords: BTreeMap<String, String>,
}

/// Interaction analytics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Events retained in the ring buffer
    pub max_events: usize,

    /// Uses required before a gesture counts as a user's favorite
    pub favorite_min_uses: u64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 5,
            default_duration_secs: 2.5,
            default_transition_ms: 800,
            play_timeout_ms: 5_000,
            catalog: DEFAULT_GESTURES.iter().map(|g| g.to_string()).collect(),
            fallback_gesture: "nod".to_string(),
        }
    }
}

fn behavior(mood: &str, gestures: &[&str], interval_ms: u64) -> StateBehavior {
    StateBehavior {
        mood: Some(mood.to_string()),
        micro_gestures: gestures.iter().map(|g| g.to_string()).collect(),
        interval_ms,
    }
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            typing_debounce_ms: 2_000,
            idle: behavior("neutral", &["look_around", "idle"], 8_000),
            listening: behavior("attentive", &["listen", "nod"], 4_000),
            thinking: behavior("focused", &["thinking"], 3_000),
            speaking: behavior("happy", &["talk", "explain"], 3_500),
            user_writing: behavior("attentive", &["look_around"], 5_000),
            click_gesture: "wave".to_string(),
            touch_gesture: "nod".to_string(),
            long_press_gesture: "celebrate".to_string(),
            long_press_ms: 600,
            look_at_ms: 1_000,
        }
    }
}

impl InteractionConfig {
    pub fn behavior_for(&self, state: AvatarState) -> &StateBehavior {
        match state {
            AvatarState::Idle => &self.idle,
            AvatarState::Listening => &self.listening,
            AvatarState::Thinking => &self.thinking,
            AvatarState::Speaking => &self.speaking,
            AvatarState::UserWriting => &self.user_writing,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.5,
            confidence_cap: 0.9,
            uncertain_gesture: "uncertain".to_string(),
            extra_domain_keywords: BTreeMap::new(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_events: 1_000,
            favorite_min_uses: 3,
        }
    }
}

fn validate_gesture_name(name: &str, what: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if name.len() > 64 {
        return Err(format!("{} too long (max 64 chars)", what));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(format!("{} contains invalid characters: {}", what, name));
    }
    Ok(())
}

impl GestureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_size == 0 {
            return Err("Queue size must be greater than 0".to_string());
        }
        if self.max_queue_size > 1_000 {
            return Err("Queue size too large (max 1000)".to_string());
        }
        if !self.default_duration_secs.is_finite() || self.default_duration_secs <= 0.0 {
            return Err("Default gesture duration must be a positive number".to_string());
        }
        if self.default_duration_secs > 300.0 {
            return Err("Default gesture duration too large (max 300 s)".to_string());
        }
        if self.default_transition_ms > 10_000 {
            return Err("Default transition too large (max 10000 ms)".to_string());
        }
        if self.play_timeout_ms == 0 {
            return Err("Play timeout must be greater than 0".to_string());
        }
        validate_gesture_name(&self.fallback_gesture, "Fallback gesture")?;
        for name in &self.catalog {
            validate_gesture_name(name, "Catalog gesture")?;
        }
        if !self.catalog.is_empty() && !self.catalog.iter().any(|g| g == &self.fallback_gesture) {
            return Err(format!("Fallback gesture '{}' is not in the catalog", self.fallback_gesture));
        }
        Ok(())
    }
}

impl InteractionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.typing_debounce_ms == 0 {
            return Err("Typing debounce must be greater than 0".to_string());
        }
        if self.typing_debounce_ms > 60_000 {
            return Err("Typing debounce too large (max 60000 ms)".to_string());
        }
        for state in AvatarState::ALL {
            let behavior = self.behavior_for(state);
            if behavior.interval_ms > 0 && behavior.interval_ms < 100 {
                return Err(format!("Micro-gesture interval for {:?} too small (min 100 ms)", state));
            }
            for gesture in &behavior.micro_gestures {
                validate_gesture_name(gesture, "Micro-gesture")?;
            }
        }
        validate_gesture_name(&self.click_gesture, "Click gesture")?;
        validate_gesture_name(&self.touch_gesture, "Touch gesture")?;
        validate_gesture_name(&self.long_press_gesture, "Long press gesture")?;
        Ok(())
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Err("Acceptance threshold must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_cap) {
            return Err("Confidence cap must be between 0.0 and 1.0".to_string());
        }
        validate_gesture_name(&self.uncertain_gesture, "Uncertain gesture")?;
        for (keyword, gesture) in &self.extra_domain_keywords {
            if keyword.trim().is_empty() || keyword.len() > 64 {
                return Err(format!("Invalid domain keyword: {:?}", keyword));
            }
            validate_gesture_name(gesture, "Domain gesture")?;
        }
        Ok(())
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_events == 0 {
            return Err("Event buffer must hold at least one event".to_string());
        }
        if self.max_events > 1_000_000 {
            return Err("Event buffer too large (max 1000000)".to_string());
        }
        Ok(())
    }
}

impl AvatarConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.gestures.validate()?;
        self.interaction.validate()?;
        self.analyzer.validate()?;
        self.analytics.validate()?;
        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.avatar.validate()?;
        self.speech.validate()?;
        Ok(())
    }

    /// Load from an optional settings file, then apply `MENTORA_*` overrides
    pub fn load(path: Option<&Path>, env: &EnvOverrides) -> Result<Self, AvatarError> {
        let mut config: EngineConfig = match path {
            Some(path) => mentora_core::load_settings(path)?,
            None => EngineConfig::default(),
        };
        config.apply_env(env);
        config.validate().map_err(AvatarError::Config)?;
        Ok(config)
    }

    pub fn apply_env(&mut self, env: &EnvOverrides) {
        env.apply("queue_size", &mut self.avatar.gestures.max_queue_size);
        env.apply("gesture_duration_secs", &mut self.avatar.gestures.default_duration_secs);
        env.apply("gesture_transition_ms", &mut self.avatar.gestures.default_transition_ms);
        env.apply("typing_debounce_ms", &mut self.avatar.interaction.typing_debounce_ms);
        env.apply("max_events", &mut self.avatar.analytics.max_events);
        self.speech.apply_env(env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.avatar.gestures.max_queue_size, 5);
        assert_eq!(config.avatar.interaction.typing_debounce_ms, 2_000);
        assert_eq!(config.speech.progressive_start_chars, 10);
    }

    #[test]
    fn fallback_must_be_known() {
        let mut config = GestureConfig::default();
        config.fallback_gesture = "moonwalk".to_string();
        assert!(config.validate().is_err());

        config.catalog.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tiny_intervals_are_rejected() {
        let mut config = InteractionConfig::default();
        config.thinking.interval_ms = 10;
        assert!(config.validate().is_err());

        config.thinking.interval_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mentora.toml");
        std::fs::write(
            &path,
            "[avatar.gestures]\nmax_queue_size = 3\n\n[speech]\nprogressive_start_chars = 20\n",
        )
        .unwrap();

        let env = EnvOverrides::from_pairs("MENTORA", vec![("MENTORA_TYPING_DEBOUNCE_MS", "1500")]);
        let config = EngineConfig::load(Some(&path), &env).unwrap();
        assert_eq!(config.avatar.gestures.max_queue_size, 3);
        assert_eq!(config.avatar.gestures.default_transition_ms, 800);
        assert_eq!(config.speech.progressive_start_chars, 20);
        assert_eq!(config.avatar.interaction.typing_debounce_ms, 1_500);
    }

    #[test]
    fn invalid_override_fails_validation() {
        let env = EnvOverrides::from_pairs("MENTORA", vec![("MENTORA_QUEUE_SIZE", "0")]);
        let result = EngineConfig::load(None, &env);
        assert!(matches!(result, Err(AvatarError::Config(_))));
    }
}
