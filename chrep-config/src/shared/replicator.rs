use std::collections::BTreeMap;

use serde::Deserialize;

use crate::load::Config;
use crate::shared::{DestinationConfig, PipelineConfig, TableConfig, ValidationError};

/// Top-level configuration for the replicator service.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    /// Source pipeline configuration.
    pub pipeline: PipelineConfig,
    /// Destination configuration.
    pub destination: DestinationConfig,
    /// Replicated tables keyed by source table name.
    pub tables: BTreeMap<String, TableConfig>,
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

impl ReplicatorConfig {
    /// Validates the whole configuration before any connection is attempted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;

        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        for (table_name, table_config) in &self.tables {
            table_config.validate(table_name)?;
        }

        Ok(())
    }
}
