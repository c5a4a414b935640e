use crate::error::{GatewayError, Result};
use crate::registry::{Model, ModelRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the model list as JSON. Overrides the file.
pub const MODELS_ENV: &str = "MODELS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend gateway host; each model's endpoint is appended to it.
    #[serde(default = "default_host")]
    pub host: String,
    /// Env var holding the secret callers must present.
    #[serde(default = "default_gateway_key_env")]
    pub gateway_key_env: String,
    /// Env var holding the secret sent to the backend in `cf-aig-authorization`.
    #[serde(default = "default_provider_key_env")]
    pub provider_key_env: String,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,
}

/// The model list, either inline as TOML tables or as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelsConfig {
    Json(String),
    List(Vec<Model>),
}

fn default_port() -> u16 {
    8787
}

fn default_host() -> String {
    "https://gateway.ai.cloudflare.com".to_string()
}

fn default_gateway_key_env() -> String {
    "PROXY_API_KEY".to_string()
}

fn default_provider_key_env() -> String {
    "CF_GATEWAY_KEY".to_string()
}

fn default_owned_by() -> String {
    "cloudflare".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            gateway_key_env: default_gateway_key_env(),
            provider_key_env: default_provider_key_env(),
            owned_by: default_owned_by(),
            models: None,
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults and environment");
        Ok(Self::default())
    }

    /// Build the model table. `MODELS_CONFIG` wins over the file.
    pub fn model_registry(&self) -> Result<ModelRegistry> {
        match std::env::var(MODELS_ENV) {
            Ok(raw) => ModelRegistry::from_json(&raw),
            Err(_) => self.file_model_registry(),
        }
    }

    /// Build the model table from the config file alone.
    pub fn file_model_registry(&self) -> Result<ModelRegistry> {
        match self.models {
            Some(ModelsConfig::Json(ref raw)) => ModelRegistry::from_json(raw),
            Some(ModelsConfig::List(ref models)) => Ok(ModelRegistry::new(models.clone())),
            None => Err(GatewayError::config(format!(
                "No models configured. Set {MODELS_ENV} or add `models` to the config file"
            ))),
        }
    }

    /// Resolve the secret callers authenticate with.
    pub fn resolve_gateway_key(&self) -> Result<String> {
        resolve_env(&self.gateway_key_env)
    }

    /// Resolve the secret forwarded to the backend.
    pub fn resolve_provider_key(&self) -> Result<String> {
        resolve_env(&self.provider_key_env)
    }
}

fn resolve_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::config(format!("Environment variable '{name}' not set")))
}

/// Candidate config file locations, in lookup order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("gateway-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("gateway-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("gateway-proxy").join("config.toml"));
        paths.push(home.join(".gateway-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_with_model_tables() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
host = "http://localhost:9000"

[[models]]
id = "@cf/meta/llama-3.1-8b-instruct"
name = "llama"
endpoint = "/v1/acct/gw/workers-ai/v1"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "http://localhost:9000");
        assert_eq!(config.gateway_key_env, "PROXY_API_KEY");

        let registry = config.file_model_registry().unwrap();
        assert_eq!(
            registry.resolve("llama").unwrap().id,
            "@cf/meta/llama-3.1-8b-instruct"
        );
    }

    #[test]
    fn test_load_config_with_json_models() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"models = '[{{"id":"gpt-4o","name":"fast","endpoint":"/openai"}}]'"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 8787);

        let registry = config.file_model_registry().unwrap();
        assert_eq!(registry.resolve("fast").unwrap().endpoint, "/openai");
    }

    #[test]
    fn test_missing_models_is_config_error() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.file_model_registry(),
            Err(GatewayError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = GatewayConfig::load(Path::new("/nonexistent/gateway-proxy.toml")).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }
}
