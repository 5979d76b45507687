use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch processing configuration for destination inserts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows per INSERT during the initial table copy.
    #[serde(default = "default_max_rows_per_insert")]
    pub max_rows_per_insert: usize,
    /// Start a new INSERT statement after this many uncompressed bytes.
    #[serde(default = "default_max_bytes_per_insert")]
    pub max_bytes_per_insert: u64,
}

impl BatchConfig {
    /// Default maximum row count per INSERT during table copy.
    pub const DEFAULT_MAX_ROWS_PER_INSERT: usize = 10_000;

    /// Default maximum uncompressed byte count per INSERT statement.
    pub const DEFAULT_MAX_BYTES_PER_INSERT: u64 = 64 * 1024 * 1024;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_rows_per_insert == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_rows_per_insert".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_bytes_per_insert == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_bytes_per_insert".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows_per_insert: default_max_rows_per_insert(),
            max_bytes_per_insert: default_max_bytes_per_insert(),
        }
    }
}

fn default_max_rows_per_insert() -> usize {
    BatchConfig::DEFAULT_MAX_ROWS_PER_INSERT
}

fn default_max_bytes_per_insert() -> u64 {
    BatchConfig::DEFAULT_MAX_BYTES_PER_INSERT
}
