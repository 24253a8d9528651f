use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path '{path}': {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    General(String),

    #[error("Could not determine the XDG {0} directory.")]
    XdgDirectoryNotFound(&'static str),

    #[error("Host '{0}' is not defined in the configuration. Add a [hosts.{0}] section.")]
    UnknownHost(String),

    #[error("No host is configured for backend '{0}'. Add it to [backend_hosts] or pass a host explicitly.")]
    NoHostForBackend(String),

    #[error("Could not find {kind} submit script for host '{host}' and backend '{backend}'. Available templates on this host: {}", available.join(", "))]
    MissingSubmitTemplate {
        kind: &'static str,
        host: String,
        backend: String,
        available: Vec<String>,
    },

    #[error("Submit script template for host '{host}' uses unknown placeholder '{{{placeholder}}}'. Escape literal braces as '{{{{' and '}}}}'.")]
    UnknownPlaceholder { host: String, placeholder: String },

    #[error("Submit script template for host '{host}' has an unbalanced brace at byte {offset}.")]
    MalformedTemplate { host: String, offset: usize },

    #[error("Named template '{0}' is not registered under [templates].")]
    UnknownNamedTemplate(String),

    #[error("No incore command is configured for backend '{backend}' on host '{host}'.")]
    MissingIncoreCommand { host: String, backend: String },
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job specification: {0}")]
    InvalidJobSpec(String),

    #[error("The {backend} backend does not support {operation}.")]
    Unsupported { backend: String, operation: String },

    #[error("Unknown backend '{name}'. Registered backends: {}", registered.join(", "))]
    UnknownBackend {
        name: String,
        registered: Vec<String>,
    },

    #[error("Invalid job type '{0}'.")]
    InvalidJobType(String),

    #[error("Invalid cluster software '{0}'. Valid values are: slurm, oge, sge, pbs, htcondor")]
    InvalidClusterSoftware(String),
}
