// Layered settings loading: file (JSON, TOML or YAML) then environment overrides

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

const MAX_SETTINGS_FILE_BYTES: u64 = 1024 * 1024;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Json,
    Toml,
    Yaml,
}

impl SettingsFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(SettingsFormat::Json),
            "toml" => Some(SettingsFormat::Toml),
            "yaml" | "yml" => Some(SettingsFormat::Yaml),
            _ => None,
        }
    }
}

/// Parse settings from a string.
///
/// With no explicit format, JSON is tried first, then TOML, then YAML.
pub fn parse_settings<T: DeserializeOwned>(content: &str, format: Option<SettingsFormat>) -> Result<T> {
    match format {
        Some(SettingsFormat::Json) => {
            serde_json::from_str(content).map_err(|e| Error::Deserialization(format!("JSON: {}", e)))
        }
        Some(SettingsFormat::Toml) => {
            toml::from_str(content).map_err(|e| Error::Deserialization(format!("TOML: {}", e)))
        }
        Some(SettingsFormat::Yaml) => {
            serde_yaml::from_str(content).map_err(|e| Error::Deserialization(format!("YAML: {}", e)))
        }
        None => {
            if let Ok(value) = serde_json::from_str::<T>(content) {
                return Ok(value);
            }
            if let Ok(value) = toml::from_str::<T>(content) {
                return Ok(value);
            }
            serde_yaml::from_str::<T>(content)
                .map_err(|_| Error::Deserialization("Unknown settings format".to_string()))
        }
    }
}

/// Render settings in the given format
pub fn render_settings<T: Serialize>(value: &T, format: SettingsFormat) -> Result<String> {
    match format {
        SettingsFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(format!("JSON: {}", e)))
        }
        SettingsFormat::Toml => {
            toml::to_string_pretty(value).map_err(|e| Error::Serialization(format!("TOML: {}", e)))
        }
        SettingsFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| Error::Serialization(format!("YAML: {}", e)))
        }
    }
}

/// Load settings from a file on disk
pub fn load_settings<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_SETTINGS_FILE_BYTES {
        return Err(Error::Configuration(format!(
            "Settings file too large ({} bytes, max {})",
            metadata.len(),
            MAX_SETTINGS_FILE_BYTES
        )));
    }

    let content = std::fs::read_to_string(path)?;
    debug!("Loading settings from {}", path.display());
    parse_settings(&content, SettingsFormat::from_path(path))
}

/// Snapshot of `PREFIX_*` environment variables used to override file settings
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// Capture the current process environment
    pub fn from_env(prefix: &str) -> Self {
        Self::from_pairs(prefix, std::env::vars())
    }

    /// Build from explicit key/value pairs (keys are full variable names)
    pub fn from_pairs<I, K, V>(prefix: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = format!("{}_", prefix.to_ascii_uppercase());
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&prefix))
            .collect();
        Self { prefix, vars }
    }

    /// Read `PREFIX_KEY` and parse it; unparsable values are logged and ignored
    pub fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        let name = format!("{}{}", self.prefix, key.to_ascii_uppercase());
        let raw = self.vars.get(&name)?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable override {}={:?}", name, raw);
                None
            }
        }
    }

    /// Overwrite `target` when the variable is present and valid
    pub fn apply<T: FromStr>(&self, key: &str, target: &mut T) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
