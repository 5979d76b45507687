use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No tables are configured for replication.
    #[error("at least one table must be configured under `tables`")]
    NoTables,

    /// An engine that collapses rows was configured without its sign column.
    #[error("table `{0}`: engine `{1}` requires `sign_column` to be set")]
    MissingSignColumn(String, String),

    /// An engine that versions rows was configured without its version column.
    #[error("table `{0}`: engine `{1}` requires `version_column` to be set")]
    MissingVersionColumn(String, String),

    /// A table was configured without columns.
    #[error("table `{0}`: `columns` must not be empty")]
    NoColumns(String),

    /// A generic field constraint violation.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
