//! Error types for the orchestration harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Failed to provision '{service}': {reason}")]
    Provision { service: String, reason: String },

    #[error("Dependencies not healthy before deadline: {}", pending.join(", "))]
    ReadinessTimeout { pending: Vec<String> },

    #[error("Transient install failure: {0}")]
    InstallTransient(String),

    #[error("Install failed: {0}")]
    InstallFatal(String),

    #[error("Tier '{tier}' executor error: {reason}")]
    Tier { tier: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid run plan: {0}")]
    InvalidPlan(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
