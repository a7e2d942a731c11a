//! Hub configuration file.

use std::collections::HashSet;
use std::path::Path;

use hub_engine::ModelParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Models known to the hub, e.g.
///
/// ```json
/// { "models": [ { "name": "llama-7b", "modelPath": "/models/7b.bin", "maxInstances": 2 } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    #[serde(default)]
    pub models: Vec<ModelParams>,
}

impl HubConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Names must be unique and non-empty; sizes must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ConfigError::Invalid("model with empty name".into()));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate model name {}",
                    model.name
                )));
            }
            if model.context_size == 0 || model.batch_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "model {} needs positive context and batch sizes",
                    model.name
                )));
            }
        }
        Ok(())
    }

    pub fn model(&self, name: &str) -> Option<&ModelParams> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_models() {
        let config = HubConfig::from_json(
            r#"{"models":[{"name":"a","modelPath":"/a.bin"},{"name":"b","modelPath":"/b.bin","contextSize":2048}]}"#,
        )
        .unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.model("b").unwrap().context_size, 2048);
        assert!(config.model("c").is_none());
    }

    #[test]
    fn empty_document_is_valid() {
        assert!(HubConfig::from_json("{}").unwrap().models.is_empty());
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = HubConfig::from_json(
            r#"{"models":[{"name":"a","modelPath":"x"},{"name":"a","modelPath":"y"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_context_rejected() {
        let err = HubConfig::from_json(r#"{"models":[{"name":"a","contextSize":0}]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            HubConfig::from_json("{models"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            HubConfig::from_file("/nonexistent/hub.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
