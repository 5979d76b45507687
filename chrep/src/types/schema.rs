use std::fmt;

use tokio_postgres::types::Type;

use crate::error::{ErrorKind, ReplError, ReplResult};

/// How much of a row's pre-image the source emits for updates and deletes.
///
/// Parsed from the single-character `pg_class.relreplident` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaIdentity {
    /// Primary key columns only.
    Default,
    /// No pre-image at all.
    Nothing,
    /// The complete old row.
    Full,
    /// Columns of a designated index.
    Index,
}

impl ReplicaIdentity {
    /// Parses the `relreplident` catalog character.
    pub fn from_catalog_char(value: &str) -> ReplResult<Self> {
        match value {
            "d" => Ok(ReplicaIdentity::Default),
            "n" => Ok(ReplicaIdentity::Nothing),
            "f" => Ok(ReplicaIdentity::Full),
            "i" => Ok(ReplicaIdentity::Index),
            other => Err(ReplError::new(
                ErrorKind::SourceSchemaError,
                "unknown replica identity",
            )
            .with_detail(format!("unexpected relreplident value `{other}`"))),
        }
    }
}

impl fmt::Display for ReplicaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaIdentity::Default => write!(f, "default"),
            ReplicaIdentity::Nothing => write!(f, "nothing"),
            ReplicaIdentity::Full => write!(f, "full"),
            ReplicaIdentity::Index => write!(f, "index"),
        }
    }
}

/// Schema of a single replicated column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Postgres type of the column.
    pub typ: Type,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
    /// Whether the column is part of the primary key.
    pub primary: bool,
}
