use chrep::error::ReplError;
use chrep_config::LoadConfigError;
use chrep_config::shared::ValidationError;
use thiserror::Error;

pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Errors surfaced by the replicator service binary.
#[derive(Debug, Error)]
pub enum ReplicatorError {
    /// Configuration could not be loaded.
    #[error("could not load configuration: {0}")]
    LoadConfig(#[from] LoadConfigError),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    /// The replication pipeline terminated with an error.
    #[error("replication failed: {0}")]
    Replication(#[from] ReplError),

    /// The async runtime could not be built.
    #[error("could not build tokio runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
