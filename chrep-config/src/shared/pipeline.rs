use serde::Deserialize;

use crate::shared::{BatchConfig, PgConnectionConfig, ValidationError};

/// Configuration of the replication pipeline against the source database.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Name of the Postgres publication to use for logical replication.
    pub publication_name: String,
    /// Name of the durable replication slot to stream from.
    ///
    /// The slot's confirmed flush LSN is the resume position across restarts;
    /// it is kept current through standby status updates.
    pub replication_slot_name: String,
    /// The connection configuration for the source Postgres instance.
    pub pg_connection: PgConnectionConfig,
    /// Batch processing configuration.
    #[serde(default)]
    pub batch: BatchConfig,
}

impl PipelineConfig {
    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;

        if self.publication_name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.publication_name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.replication_slot_name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.replication_slot_name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}
