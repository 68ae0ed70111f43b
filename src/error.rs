use std::time::Duration;

use thiserror::Error;

/// Failures raised by a CI host adapter while talking to its backing system.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host is unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Host API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Host API request failed after {retries} retries (status {status})")]
    ApiErrorAfterRetries { status: u16, retries: u32 },

    #[error("Malformed host response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid host configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Build {build_id} not found for job {job_id}")]
    BuildNotFound { job_id: String, build_id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for the unknown-job and unknown-build cases.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_) | Self::BuildNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
pub type HostResult<T> = std::result::Result<T, HostError>;
