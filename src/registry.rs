//! The configured model table.
//!
//! Callers address models by a public alias (`name`); the backend knows them by
//! `id` and serves each one under its own `endpoint` suffix. The table is built
//! once at startup and only read afterwards.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Backend model identifier sent upstream.
    pub id: String,
    /// Caller-facing alias.
    pub name: String,
    /// Path suffix appended to the gateway host.
    pub endpoint: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Model>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// Parse a model list from a JSON value.
    ///
    /// Accepts either a JSON array or a JSON string holding the array, since
    /// dashboards tend to store the list double-encoded.
    ///
    /// # Errors
    /// Returns `GatewayError::Config` if the value is not a list of models.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| GatewayError::config(format!("Failed to parse model list: {e}")))?;

        let value = match value {
            serde_json::Value::String(inner) => serde_json::from_str(&inner).map_err(|e| {
                GatewayError::config(format!("Failed to parse encoded model list: {e}"))
            })?,
            other => other,
        };

        let models: Vec<Model> = serde_json::from_value(value)
            .map_err(|e| GatewayError::config(format!("Invalid model list: {e}")))?;

        Ok(Self::new(models))
    }

    /// Look a model up by its caller-facing name. Exact, case-sensitive match.
    ///
    /// # Errors
    /// Returns `GatewayError::ModelNotSupported` when no entry has that name.
    pub fn resolve(&self, name: &str) -> Result<&Model> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| GatewayError::model_not_supported(name))
    }

    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, name: &str) -> Model {
        Model {
            id: id.to_string(),
            name: name.to_string(),
            endpoint: format!("/v1/acct/{name}"),
        }
    }

    #[test]
    fn test_resolve_every_configured_name() {
        let models = vec![
            model("backend-a", "a"),
            model("backend-b", "b"),
            model("backend-c", "c"),
        ];
        let registry = ModelRegistry::new(models.clone());

        for m in &models {
            assert_eq!(registry.resolve(&m.name).unwrap(), m);
        }
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = ModelRegistry::new(vec![model("backend-m", "m")]);
        let err = registry.resolve("ghost").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotSupported { ref model } if model == "ghost"));
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        let registry = ModelRegistry::new(vec![model("backend-m", "Model")]);
        assert!(registry.resolve("model").is_err());
        assert!(registry.resolve("Model").is_ok());
    }

    #[test]
    fn test_from_json_array() {
        let raw = r#"[{"id":"@cf/meta/llama","name":"llama","endpoint":"/v1/acct/gw/workers-ai"}]"#;
        let registry = ModelRegistry::from_json(raw).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("llama").unwrap().id, "@cf/meta/llama");
    }

    #[test]
    fn test_from_json_double_encoded() {
        let inner = r#"[{"id":"x","name":"y","endpoint":"/z"}]"#;
        let raw = serde_json::to_string(inner).unwrap();
        let registry = ModelRegistry::from_json(&raw).unwrap();
        assert_eq!(registry.resolve("y").unwrap().endpoint, "/z");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ModelRegistry::from_json("{not json").is_err());
        assert!(ModelRegistry::from_json(r#"{"id":"x"}"#).is_err());
    }
}
