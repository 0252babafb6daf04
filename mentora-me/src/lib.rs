//! mentora-me: interactive 3D tutor avatar
//!
//! Coordinates the animated character with the conversation:
//! - Priority gesture scheduling against a single renderer
//! - Avatar state derived from thinking/listening/speaking/typing signals
//! - Content analysis of user and assistant text into gestures
//! - Per-user interaction analytics feeding adaptive gesture choices
//! - An engine facade wiring the above to progressive speech (mentora-spk)

pub mod error;
pub mod config;
pub mod renderer;
pub mod gesture_scheduler;
pub mod state_machine;
pub mod content_analyzer;
pub mod analytics;
pub mod engine;

pub use error::AvatarError;
pub use config::{
    AnalyticsConfig, AnalyzerConfig, AvatarConfig, EngineConfig, GestureConfig, InteractionConfig, StateBehavior,
};
pub use renderer::{CharacterRenderer, HoverPhase, Position, RendererAudioChannel};
pub use gesture_scheduler::{GestureEvent, GesturePriority, GestureRequest, GestureScheduler};
pub use state_machine::{derive_state, AvatarState, InteractionSignals, InteractionStateMachine, StateTransition};
pub use content_analyzer::{
    AnalysisTags, Complexity, ContentAnalysis, ContentAnalyzer, Intent, RecommendationSource, Sentiment,
};
pub use analytics::{InteractionEvent, InteractionKind, InteractionStyle, InteractionTracker, UserInteractionProfile};
pub use engine::AvatarEngine;
