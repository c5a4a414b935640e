//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Model {model} not supported")]
    ModelNotSupported { model: String },

    #[error("{message}")]
    Upstream { message: String },

    #[error("Tool call {call_id} returned malformed arguments: {source}")]
    MalformedToolArguments {
        call_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn model_not_supported(model: impl Into<String>) -> Self {
        Self::ModelNotSupported {
            model: model.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Whether the caller is at fault (reported as HTTP 400).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ModelNotSupported { .. } | Self::InvalidRequest { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
