use core::str;

use postgres_replication::protocol;
use tracing::debug;

use crate::conversions::text::parse_cell_from_postgres_text;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::registry::RelationRegistry;
use crate::types::{
    BeginMessage, Cell, ColumnSchema, CommitMessage, RelationId, Row, SourceMessage,
};
use crate::{bail, repl_error};

/// Decodes one logical replication protocol message into a [`SourceMessage`].
///
/// Data messages for relations that are not in the registry cannot be typed
/// and are skipped here (`Ok(None)`); they belong to published but
/// unconfigured tables and are ignored by contract.
pub fn decode_message(
    registry: &RelationRegistry,
    message: &protocol::LogicalReplicationMessage,
) -> ReplResult<Option<SourceMessage>> {
    use protocol::LogicalReplicationMessage::*;

    let decoded = match message {
        Begin(body) => SourceMessage::Begin(BeginMessage {
            final_lsn: body.final_lsn().into(),
            timestamp: body.timestamp(),
            xid: body.xid(),
        }),
        Commit(body) => SourceMessage::Commit(CommitMessage {
            commit_lsn: body.commit_lsn().into(),
            end_lsn: body.end_lsn().into(),
            timestamp: body.timestamp(),
        }),
        Relation(body) => SourceMessage::Relation {
            relation_id: RelationId::new(body.rel_id()),
        },
        Origin(_) => SourceMessage::Origin,
        Type(_) => SourceMessage::Type,
        Insert(body) => {
            let relation_id = RelationId::new(body.rel_id());
            let Some(info) = registry.resolve(relation_id) else {
                debug!(%relation_id, "insert for unregistered relation, skipping");
                return Ok(None);
            };

            let new_row = convert_tuple_to_row(&info.column_schemas, body.tuple().tuple_data())?;

            SourceMessage::Insert {
                relation_id,
                new_row,
            }
        }
        Update(body) => {
            let relation_id = RelationId::new(body.rel_id());
            let Some(info) = registry.resolve(relation_id) else {
                debug!(%relation_id, "update for unregistered relation, skipping");
                return Ok(None);
            };

            let old_tuple = body.old_tuple().or(body.key_tuple());
            let Some(old_tuple) = old_tuple else {
                bail!(
                    ErrorKind::DecodeFailed,
                    "update without pre-image",
                    format!("relation {relation_id} must have FULL replica identity")
                );
            };

            let old_row = convert_tuple_to_row(&info.column_schemas, old_tuple.tuple_data())?;
            let new_row =
                convert_tuple_to_row(&info.column_schemas, body.new_tuple().tuple_data())?;

            SourceMessage::Update {
                relation_id,
                old_row,
                new_row,
            }
        }
        Delete(body) => {
            let relation_id = RelationId::new(body.rel_id());
            let Some(info) = registry.resolve(relation_id) else {
                debug!(%relation_id, "delete for unregistered relation, skipping");
                return Ok(None);
            };

            let old_tuple = body.old_tuple().or(body.key_tuple());
            let Some(old_tuple) = old_tuple else {
                bail!(
                    ErrorKind::DecodeFailed,
                    "delete without pre-image",
                    format!("relation {relation_id} must have FULL replica identity")
                );
            };

            let old_row = convert_tuple_to_row(&info.column_schemas, old_tuple.tuple_data())?;

            SourceMessage::Delete {
                relation_id,
                old_row,
            }
        }
        Truncate(body) => SourceMessage::Truncate {
            relation_ids: body.rel_ids().iter().map(|id| RelationId::new(*id)).collect(),
        },
        _ => {
            bail!(
                ErrorKind::DecodeFailed,
                "unsupported logical replication message"
            );
        }
    };

    Ok(Some(decoded))
}

/// Converts pgoutput tuple data into a [`Row`] using the column schemas.
///
/// Null markers become [`Cell::Null`], unchanged TOAST markers become
/// [`Cell::Unchanged`] (resolved later from the pre-image), and text data is
/// parsed into its typed cell. Binary tuple data is not produced by
/// `proto_version '1'` and is rejected.
fn convert_tuple_to_row(
    column_schemas: &[ColumnSchema],
    tuple_data: &[protocol::TupleData],
) -> ReplResult<Row> {
    let mut values = Vec::with_capacity(tuple_data.len());

    for (i, column_schema) in column_schemas.iter().enumerate() {
        // Every column has corresponding tuple data, even null values.
        let Some(tuple_data) = tuple_data.get(i) else {
            bail!(
                ErrorKind::DecodeFailed,
                "tuple data missing value",
                format!("no tuple data for column '{}'", column_schema.name)
            );
        };

        let cell = match tuple_data {
            protocol::TupleData::Null => Cell::Null,
            protocol::TupleData::UnchangedToast => Cell::Unchanged,
            protocol::TupleData::Binary(_) => {
                bail!(
                    ErrorKind::DecodeFailed,
                    "binary tuple data is not supported"
                );
            }
            protocol::TupleData::Text(bytes) => {
                let text = str::from_utf8(&bytes[..])?;
                parse_cell_from_postgres_text(&column_schema.typ, text)?
            }
        };

        values.push(cell);
    }

    Ok(Row::new(values))
}
