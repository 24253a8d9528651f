use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] essq_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] essq_core::errors::DomainError),

    #[error(transparent)]
    Client(#[from] essq_client::ClientError),

    #[error(transparent)]
    Engine(#[from] essq_engine::EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Failed to read job specification '{path}': {source}")]
    JobSpec {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{failed} of {total} job(s) did not succeed")]
    JobsFailed { failed: usize, total: usize },
}
