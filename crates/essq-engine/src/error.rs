use essq_client::ClientError;
use essq_core::errors::{ConfigError, DomainError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to process JSON data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Output '{path}' is not available yet")]
    OutputMissing { path: PathBuf },

    #[error("Could not interpret output '{path}': {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Job '{job}' cannot be troubleshot further: {reason}")]
    ResourceExhausted { job: String, reason: String },

    #[error("Invalid job state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Client(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
