//! Loader configuration.
//!
//! Configuration is a small JSON document; every field has a default, so an
//! empty object (or no file at all) is valid:
//!
//! ```json
//! {
//!   "base_url": "https://games.example/dos/",
//!   "script_url": "components/js-dos-apiv3.js",
//!   "driver_name": "js-dos",
//!   "extract_export": "extract_zip",
//!   "entry_export": "dosbox_main"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Default location of the driver script, relative to `base_url`.
pub const DEFAULT_SCRIPT_URL: &str = "components/js-dos-apiv3.js";

/// Loader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Base that relative script and archive URLs are resolved against.
    pub base_url: Option<String>,
    /// Driver script location.
    pub script_url: String,
    /// Name shown in the "Loading ..." status line.
    pub driver_name: String,
    /// Module export that extracts an archive buffer.
    pub extract_export: String,
    /// Module export that starts a program.
    pub entry_export: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            driver_name: "js-dos".to_string(),
            extract_export: crate::mount::EXTRACT_EXPORT.to_string(),
            entry_export: crate::loader::ENTRY_EXPORT.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&text)
    }

    /// Check that required fields are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("script_url", &self.script_url),
            ("extract_export", &self.extract_export),
            ("entry_export", &self.entry_export),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }
        self.base_url()?;
        Ok(())
    }

    /// Parsed `base_url`.
    pub fn base_url(&self) -> Result<Option<Url>, ConfigError> {
        self.base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("`{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("invalid base_url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LoaderConfig::from_json("{}").unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.script_url, "components/js-dos-apiv3.js");
        assert_eq!(config.extract_export, "extract_zip");
        assert_eq!(config.entry_export, "dosbox_main");
    }

    #[test]
    fn test_partial_override() {
        let config = LoaderConfig::from_json(
            r#"{ "base_url": "http://localhost:8000/", "driver_name": "dosbox" }"#,
        )
        .unwrap();
        assert_eq!(config.driver_name, "dosbox");
        assert_eq!(
            config.base_url().unwrap().unwrap().as_str(),
            "http://localhost:8000/"
        );
    }

    #[test]
    fn test_rejects_unknown_and_empty_fields() {
        assert!(matches!(
            LoaderConfig::from_json(r#"{ "onload": "x" }"#),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            LoaderConfig::from_json(r#"{ "entry_export": " " }"#),
            Err(ConfigError::EmptyField("entry_export"))
        );
        assert!(matches!(
            LoaderConfig::from_json(r#"{ "base_url": "not a url" }"#),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            LoaderConfig::load("/nonexistent/dosload.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
