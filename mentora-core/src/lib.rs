//! mentora-core: shared plumbing for the Mentora avatar engine
//!
//! Holds the pieces every other crate leans on:
//! - the workspace-wide `Error`/`Result` pair
//! - layered settings loading (file formats + `MENTORA_*` environment overrides)
//! - identifier and timestamp helpers

pub mod error;
pub mod ids;
pub mod settings;

pub use error::{Error, Result};
pub use ids::{new_id, now_millis};
pub use settings::{load_settings, parse_settings, render_settings, EnvOverrides, SettingsFormat};
