use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Payload not found: {0}")]
    NotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Orchestration failure: {0}")]
    OrchestrationFailure(String),

    #[error("Delivery to agent {agent_id} timed out after {timeout:?}")]
    DeliveryTimeout { agent_id: String, timeout: Duration },

    #[error("Delivery to agent {agent_id} failed: {reason}")]
    Delivery { agent_id: String, reason: String },

    #[error("Unsupported payload source: {0}")]
    UnsupportedSource(String),

    #[error("Upstream fetch failed: {0}")]
    Upstream(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PayloadError>;
