use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// ClickHouse merge-tree engine variant backing a destination table.
///
/// The engine determines how row-level updates and deletes from the source are
/// folded into append-only columnar storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableEngine {
    /// Append-only projection. Updates append the new image, deletes are dropped.
    MergeTree,
    /// Keeps the row with the highest value in the version column.
    ReplacingMergeTree,
    /// Cancels rows via a sign column holding +1 / -1.
    CollapsingMergeTree,
    /// As collapsing, with an additional monotonic version column.
    VersionedCollapsingMergeTree,
}

impl TableEngine {
    /// Returns `true` when the engine needs a sign column declared in config.
    pub fn requires_sign_column(&self) -> bool {
        matches!(
            self,
            TableEngine::CollapsingMergeTree | TableEngine::VersionedCollapsingMergeTree
        )
    }

    /// Returns `true` when the engine needs a version column declared in config.
    pub fn requires_version_column(&self) -> bool {
        matches!(
            self,
            TableEngine::ReplacingMergeTree | TableEngine::VersionedCollapsingMergeTree
        )
    }

    /// Returns `true` when the engine's own merge semantics absorb replayed
    /// commit frames after a crash.
    ///
    /// Plain MergeTree does not; operators choosing it accept possible
    /// duplicates under the at-least-once delivery contract.
    pub fn absorbs_replays(&self) -> bool {
        !matches!(self, TableEngine::MergeTree)
    }
}

impl fmt::Display for TableEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableEngine::MergeTree => write!(f, "MergeTree"),
            TableEngine::ReplacingMergeTree => write!(f, "ReplacingMergeTree"),
            TableEngine::CollapsingMergeTree => write!(f, "CollapsingMergeTree"),
            TableEngine::VersionedCollapsingMergeTree => {
                write!(f, "VersionedCollapsingMergeTree")
            }
        }
    }
}

/// Per-table replication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Destination table engine.
    pub engine: TableEngine,
    /// Name of the sign column in the destination table.
    ///
    /// Required for collapsing engines; the column must be declared as `Int8`.
    #[serde(default)]
    pub sign_column: Option<String>,
    /// Name of the version column in the destination table.
    ///
    /// Required for replacing/versioned engines; the column must be declared
    /// as `UInt64` and is filled with the LSN of the originating mutation.
    #[serde(default)]
    pub version_column: Option<String>,
    /// Replicated columns, in destination column order.
    pub columns: Vec<String>,
    /// Destination table name. Defaults to the source table name.
    #[serde(default)]
    pub destination_table: Option<String>,
}

impl TableConfig {
    /// Validates engine-specific column requirements for the named table.
    pub fn validate(&self, table_name: &str) -> Result<(), ValidationError> {
        if self.columns.is_empty() {
            return Err(ValidationError::NoColumns(table_name.to_string()));
        }

        if self.engine.requires_sign_column() && self.sign_column.is_none() {
            return Err(ValidationError::MissingSignColumn(
                table_name.to_string(),
                self.engine.to_string(),
            ));
        }

        if self.engine.requires_version_column() && self.version_column.is_none() {
            return Err(ValidationError::MissingVersionColumn(
                table_name.to_string(),
                self.engine.to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the destination table name for a source table.
    pub fn destination_table_name<'a>(&'a self, source_table: &'a str) -> &'a str {
        self.destination_table.as_deref().unwrap_or(source_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(engine: TableEngine) -> TableConfig {
        TableConfig {
            engine,
            sign_column: None,
            version_column: None,
            columns: vec!["id".to_string(), "v".to_string()],
            destination_table: None,
        }
    }

    #[test]
    fn merge_tree_needs_no_extra_columns() {
        assert!(table(TableEngine::MergeTree).validate("t").is_ok());
    }

    #[test]
    fn replacing_requires_version_column() {
        let mut cfg = table(TableEngine::ReplacingMergeTree);
        assert!(matches!(
            cfg.validate("t"),
            Err(ValidationError::MissingVersionColumn(..))
        ));

        cfg.version_column = Some("ver".to_string());
        assert!(cfg.validate("t").is_ok());
    }

    #[test]
    fn collapsing_requires_sign_column() {
        let mut cfg = table(TableEngine::CollapsingMergeTree);
        assert!(matches!(
            cfg.validate("t"),
            Err(ValidationError::MissingSignColumn(..))
        ));

        cfg.sign_column = Some("sign".to_string());
        assert!(cfg.validate("t").is_ok());
    }

    #[test]
    fn versioned_collapsing_requires_both_columns() {
        let mut cfg = table(TableEngine::VersionedCollapsingMergeTree);
        assert!(matches!(
            cfg.validate("t"),
            Err(ValidationError::MissingSignColumn(..))
        ));

        cfg.sign_column = Some("sign".to_string());
        assert!(matches!(
            cfg.validate("t"),
            Err(ValidationError::MissingVersionColumn(..))
        ));

        cfg.version_column = Some("ver".to_string());
        assert!(cfg.validate("t").is_ok());
    }

    #[test]
    fn empty_columns_are_rejected() {
        let mut cfg = table(TableEngine::MergeTree);
        cfg.columns.clear();
        assert!(matches!(cfg.validate("t"), Err(ValidationError::NoColumns(_))));
    }

    #[test]
    fn engine_deserializes_from_snake_case() {
        let engine: TableEngine = serde_json::from_str("\"collapsing_merge_tree\"").unwrap();
        assert_eq!(engine, TableEngine::CollapsingMergeTree);
    }

    #[test]
    fn replay_absorption_per_engine() {
        assert!(!TableEngine::MergeTree.absorbs_replays());
        assert!(TableEngine::ReplacingMergeTree.absorbs_replays());
        assert!(TableEngine::CollapsingMergeTree.absorbs_replays());
        assert!(TableEngine::VersionedCollapsingMergeTree.absorbs_replays());
    }
}
