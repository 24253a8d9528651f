use essq_core::errors::{ConfigError, DomainError};
use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Failed to encode registry record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport to host '{host}' failed: {message}")]
    Transport { host: String, message: String },

    #[error("Command '{command}' failed on host '{host}': {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        stderr: String,
    },

    #[error("Could not parse {scheduler} job id from output: {output}")]
    JobIdParse { scheduler: String, output: String },

    #[error("Registry error in '{path}': {message}")]
    Registry {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        path: std::path::PathBuf,
        reason: String,
    },
}

impl ClientError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Config(ConfigError::Io(e)) => matches!(
                e.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
