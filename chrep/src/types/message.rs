use std::fmt;

use crate::types::lsn::Lsn;
use crate::types::row::Row;

/// Opaque identifier the source assigns to each table (its OID).
///
/// Stable for the lifetime of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(u32);

impl RelationId {
    pub fn new(id: u32) -> Self {
        RelationId(id)
    }

    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction begin frame from the replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    /// LSN of the commit WAL record this transaction will end at.
    pub final_lsn: Lsn,
    /// Transaction commit timestamp in Postgres format.
    pub timestamp: i64,
    /// Transaction ID.
    pub xid: u32,
}

/// Transaction commit frame from the replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    /// LSN of the commit WAL record.
    pub commit_lsn: Lsn,
    /// LSN of the first WAL record after the transaction.
    pub end_lsn: Lsn,
    /// Transaction commit timestamp in Postgres format.
    pub timestamp: i64,
}

/// A decoded logical replication message.
///
/// `Begin` and `Commit` bracket every data message; messages are delivered in
/// LSN order and there are no nested transactions. Update and delete frames
/// carry the complete pre-image because every replicated table is required to
/// have `FULL` replica identity.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMessage {
    /// Table schema frame; ignored during streaming (schemas come from the catalog).
    Relation { relation_id: RelationId },
    Begin(BeginMessage),
    Commit(CommitMessage),
    Insert {
        relation_id: RelationId,
        new_row: Row,
    },
    Update {
        relation_id: RelationId,
        old_row: Row,
        new_row: Row,
    },
    Delete {
        relation_id: RelationId,
        old_row: Row,
    },
    /// Replication origin frame; passed through as a no-op.
    Origin,
    /// Type declaration frame; passed through as a no-op.
    Type,
    /// Truncate frame; passed through as a no-op.
    Truncate { relation_ids: Vec<RelationId> },
}
