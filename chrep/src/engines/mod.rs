//! Table-engine adapters translating row mutations into ClickHouse inserts.
//!
//! Each adapter owns the pending batch for one destination table. Between
//! `begin` and `commit` mutations accumulate as already-encoded RowBinary
//! values; `commit` flushes them in a single INSERT statement. The engine
//! variant decides how updates and deletes are expressed:
//!
//! | Engine | insert | update | delete |
//! |---|---|---|---|
//! | MergeTree | new | new | dropped |
//! | ReplacingMergeTree | new, ver=lsn | new, ver=lsn | old, ver=lsn |
//! | CollapsingMergeTree | new, sign=+1 | old sign=-1, new sign=+1 | old, sign=-1 |
//! | VersionedCollapsingMergeTree | as collapsing, ver=lsn on every row | | |

use std::time::Instant;

use chrep_config::shared::{BatchConfig, TableConfig, TableEngine};
use futures::StreamExt;
use tokio::pin;
use tracing::{debug, info};

use crate::clickhouse::client::ClickHouseClient;
use crate::clickhouse::encoding::{ClickHouseValue, cell_to_clickhouse_value};
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::metrics::CHREP_TABLE_SYNC_DURATION_SECONDS;
use crate::registry::RelationInfo;
use crate::replication::client::PgReplicationClient;
use crate::replication::stream::TableCopyStream;
use crate::types::{Cell, ColumnSchema, Lsn, Row};
use crate::{bail, repl_error};

/// Sign value for a surviving row in collapsing engines.
const SIGN_ROW: i8 = 1;

/// Sign value for a cancelling row in collapsing engines.
const SIGN_CANCEL: i8 = -1;

/// How an engine extends each emitted row with auxiliary columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineEncoding {
    MergeTree,
    Replacing,
    Collapsing,
    VersionedCollapsing,
}

impl EngineEncoding {
    fn from_engine(engine: TableEngine) -> Self {
        match engine {
            TableEngine::MergeTree => EngineEncoding::MergeTree,
            TableEngine::ReplacingMergeTree => EngineEncoding::Replacing,
            TableEngine::CollapsingMergeTree => EngineEncoding::Collapsing,
            TableEngine::VersionedCollapsingMergeTree => EngineEncoding::VersionedCollapsing,
        }
    }

    /// Appends the engine's auxiliary column values to an encoded row.
    fn extend_row(&self, values: &mut Vec<ClickHouseValue>, sign: i8, lsn: Lsn) {
        match self {
            EngineEncoding::MergeTree => {}
            EngineEncoding::Replacing => values.push(ClickHouseValue::UInt64(lsn.into_raw())),
            EngineEncoding::Collapsing => values.push(ClickHouseValue::Int8(sign)),
            EngineEncoding::VersionedCollapsing => {
                values.push(ClickHouseValue::Int8(sign));
                values.push(ClickHouseValue::UInt64(lsn.into_raw()));
            }
        }
    }
}

/// Adapter owning the write-side buffer for one destination table.
///
/// Methods are called only from the coordinator task; the adapter is not
/// internally thread-safe and does not need to be.
pub struct TableAdapter {
    /// Source table name (the configuration key).
    table_name: String,
    /// Destination table name.
    destination_table: String,
    encoding: EngineEncoding,
    client: ClickHouseClient,
    /// Prepared `INSERT INTO "t" ("c1", …) FORMAT RowBinary` statement.
    insert_sql: String,
    /// Configured columns in destination order.
    column_schemas: Vec<ColumnSchema>,
    /// Index of each configured column within a full streamed row.
    projection: Vec<usize>,
    /// Nullability per statement column (configured + auxiliary).
    nullable_flags: Vec<bool>,
    /// Rows pending for the current transaction frame.
    buffer: Vec<Vec<ClickHouseValue>>,
    max_rows_per_insert: usize,
    max_bytes_per_insert: u64,
}

impl TableAdapter {
    /// Builds the adapter for a configured table.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when a configured column does not
    /// exist in the source table or a required engine column is missing.
    pub fn new(
        table_name: &str,
        config: &TableConfig,
        info: &RelationInfo,
        client: ClickHouseClient,
        batch: &BatchConfig,
    ) -> ReplResult<Self> {
        let mut column_schemas = Vec::with_capacity(config.columns.len());
        let mut projection = Vec::with_capacity(config.columns.len());
        for column_name in &config.columns {
            let Some(position) = info
                .column_schemas
                .iter()
                .position(|c| &c.name == column_name)
            else {
                bail!(
                    ErrorKind::ConfigError,
                    "configured column not found in source table",
                    format!("table {table_name} has no column '{column_name}'")
                );
            };

            column_schemas.push(info.column_schemas[position].clone());
            projection.push(position);
        }

        let mut statement_columns: Vec<&str> =
            column_schemas.iter().map(|c| c.name.as_str()).collect();
        let mut nullable_flags: Vec<bool> = column_schemas.iter().map(|c| c.nullable).collect();

        let encoding = EngineEncoding::from_engine(config.engine);
        match encoding {
            EngineEncoding::MergeTree => {}
            EngineEncoding::Replacing => {
                let Some(version_column) = config.version_column.as_deref() else {
                    bail!(
                        ErrorKind::ConfigError,
                        "engine requires a version column",
                        format!("table {table_name} uses {} without version_column", config.engine)
                    );
                };
                statement_columns.push(version_column);
                nullable_flags.push(false);
            }
            EngineEncoding::Collapsing => {
                let Some(sign_column) = config.sign_column.as_deref() else {
                    bail!(
                        ErrorKind::ConfigError,
                        "engine requires a sign column",
                        format!("table {table_name} uses {} without sign_column", config.engine)
                    );
                };
                statement_columns.push(sign_column);
                nullable_flags.push(false);
            }
            EngineEncoding::VersionedCollapsing => {
                let (Some(sign_column), Some(version_column)) =
                    (config.sign_column.as_deref(), config.version_column.as_deref())
                else {
                    bail!(
                        ErrorKind::ConfigError,
                        "engine requires sign and version columns",
                        format!(
                            "table {table_name} uses {} without sign_column/version_column",
                            config.engine
                        )
                    );
                };
                statement_columns.push(sign_column);
                statement_columns.push(version_column);
                nullable_flags.push(false);
                nullable_flags.push(false);
            }
        }

        let destination_table = config.destination_table_name(table_name).to_string();
        let column_list = statement_columns
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_sql =
            format!("INSERT INTO \"{destination_table}\" ({column_list}) FORMAT RowBinary");

        Ok(Self {
            table_name: table_name.to_string(),
            destination_table,
            encoding,
            client,
            insert_sql,
            column_schemas,
            projection,
            nullable_flags,
            buffer: Vec::new(),
            max_rows_per_insert: batch.max_rows_per_insert,
            max_bytes_per_insert: batch.max_bytes_per_insert,
        })
    }

    /// Opens a fresh batch for a transaction frame.
    pub fn begin(&mut self) {
        self.buffer = Vec::new();
    }

    /// Buffers an insert mutation.
    pub fn insert(&mut self, lsn: Lsn, new_row: Row) -> ReplResult<()> {
        let values = self.project_row(new_row)?;
        self.push_row(values, SIGN_ROW, lsn);

        Ok(())
    }

    /// Buffers an update mutation.
    ///
    /// Unchanged TOAST placeholders in the new row are resolved from the old
    /// row before encoding; FULL replica identity guarantees the pre-image.
    pub fn update(&mut self, lsn: Lsn, old_row: Row, mut new_row: Row) -> ReplResult<()> {
        new_row.resolve_unchanged_from(&old_row)?;

        match self.encoding {
            EngineEncoding::MergeTree | EngineEncoding::Replacing => {
                let new_values = self.project_row(new_row)?;
                self.push_row(new_values, SIGN_ROW, lsn);
            }
            EngineEncoding::Collapsing | EngineEncoding::VersionedCollapsing => {
                let old_values = self.project_row(old_row)?;
                let new_values = self.project_row(new_row)?;
                self.push_row(old_values, SIGN_CANCEL, lsn);
                self.push_row(new_values, SIGN_ROW, lsn);
            }
        }

        Ok(())
    }

    /// Buffers a delete mutation.
    ///
    /// MergeTree drops deletes (append-only projection). ReplacingMergeTree
    /// re-emits the old row with the delete's LSN as version.
    pub fn delete(&mut self, lsn: Lsn, old_row: Row) -> ReplResult<()> {
        match self.encoding {
            EngineEncoding::MergeTree => {
                debug!(table = %self.table_name, "merge tree table, dropping delete");
            }
            EngineEncoding::Replacing => {
                let old_values = self.project_row(old_row)?;
                self.push_row(old_values, SIGN_ROW, lsn);
            }
            EngineEncoding::Collapsing | EngineEncoding::VersionedCollapsing => {
                let old_values = self.project_row(old_row)?;
                self.push_row(old_values, SIGN_CANCEL, lsn);
            }
        }

        Ok(())
    }

    /// Flushes the pending batch in a single INSERT statement.
    ///
    /// An empty batch performs no network round trip. On error the batch is
    /// lost and the caller must treat the failure as terminal.
    pub async fn commit(&mut self) -> ReplResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let rows = std::mem::take(&mut self.buffer);
        debug!(table = %self.table_name, rows = rows.len(), "flushing batch");

        self.client
            .insert_rows(
                &self.destination_table,
                &self.insert_sql,
                rows,
                &self.nullable_flags,
                self.max_bytes_per_insert,
                "streaming",
            )
            .await
    }

    /// Performs the initial snapshot copy for this table.
    ///
    /// Streams rows from the source under the bootstrap snapshot transaction
    /// and writes them to the destination in chunks, treating every row as an
    /// insert observed at the bootstrap LSN.
    pub async fn sync(
        &self,
        bootstrap: &PgReplicationClient,
        info: &RelationInfo,
        start_lsn: Lsn,
    ) -> ReplResult<()> {
        info!(table = %self.table_name, "starting initial table sync");
        let sync_start = Instant::now();

        let column_names: Vec<String> = self
            .column_schemas
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let copy_stream = bootstrap
            .copy_out(&info.schema, &info.name, &column_names)
            .await?;
        let rows = TableCopyStream::wrap(copy_stream, &self.column_schemas);
        pin!(rows);

        let mut chunk: Vec<Vec<ClickHouseValue>> = Vec::with_capacity(self.max_rows_per_insert);
        let mut total_rows = 0u64;

        while let Some(row) = rows.next().await {
            let row = row.map_err(|e| {
                repl_error!(
                    ErrorKind::SyncFailed,
                    "table copy failed",
                    format!("table {}: {e}", self.table_name),
                    source: e
                )
            })?;

            // COPY rows already have the configured column order.
            let mut values = Vec::with_capacity(self.nullable_flags.len());
            for cell in row.into_values() {
                values.push(cell_to_clickhouse_value(cell)?);
            }
            self.encoding.extend_row(&mut values, SIGN_ROW, start_lsn);

            chunk.push(values);
            total_rows += 1;

            if chunk.len() >= self.max_rows_per_insert {
                self.flush_sync_chunk(std::mem::take(&mut chunk)).await?;
            }
        }

        if !chunk.is_empty() {
            self.flush_sync_chunk(chunk).await?;
        }

        metrics::histogram!(
            CHREP_TABLE_SYNC_DURATION_SECONDS,
            "table" => self.table_name.clone()
        )
        .record(sync_start.elapsed().as_secs_f64());

        info!(
            table = %self.table_name,
            rows = total_rows,
            elapsed_ms = sync_start.elapsed().as_millis() as u64,
            "initial table sync complete"
        );

        Ok(())
    }

    /// Flushes any in-flight batch and releases destination resources.
    pub async fn close(&mut self) -> ReplResult<()> {
        // The HTTP client itself needs no explicit release.
        self.commit().await
    }

    /// Source table name (the configuration key).
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Number of rows currently buffered for the open transaction frame.
    pub fn pending_rows(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> &[Vec<ClickHouseValue>] {
        &self.buffer
    }

    #[cfg(test)]
    pub(crate) fn insert_sql(&self) -> &str {
        &self.insert_sql
    }

    async fn flush_sync_chunk(&self, chunk: Vec<Vec<ClickHouseValue>>) -> ReplResult<()> {
        self.client
            .insert_rows(
                &self.destination_table,
                &self.insert_sql,
                chunk,
                &self.nullable_flags,
                self.max_bytes_per_insert,
                "copy",
            )
            .await
            .map_err(|e| {
                repl_error!(
                    ErrorKind::SyncFailed,
                    "table copy insert failed",
                    format!("table {}: {e}", self.table_name),
                    source: e
                )
            })
    }

    /// Projects a full streamed row down to the configured columns and encodes
    /// the cells.
    fn project_row(&self, row: Row) -> ReplResult<Vec<ClickHouseValue>> {
        let mut cells = row.into_values();

        let mut values = Vec::with_capacity(self.nullable_flags.len());
        for &index in &self.projection {
            let Some(slot) = cells.get_mut(index) else {
                bail!(
                    ErrorKind::InvalidState,
                    "streamed row is narrower than the source schema",
                    format!(
                        "table {}: row has {} cells, column index {index} expected",
                        self.table_name,
                        cells.len()
                    )
                );
            };

            let cell = std::mem::replace(slot, Cell::Null);
            values.push(cell_to_clickhouse_value(cell)?);
        }

        Ok(values)
    }

    fn push_row(&mut self, mut values: Vec<ClickHouseValue>, sign: i8, lsn: Lsn) {
        self.encoding.extend_row(&mut values, sign, lsn);
        self.buffer.push(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationId;
    use tokio_postgres::types::Type;

    fn client() -> ClickHouseClient {
        ClickHouseClient::new("http://localhost:8123", "default", None, "default")
    }

    fn relation_info() -> RelationInfo {
        RelationInfo {
            relation_id: RelationId::new(16384),
            schema: "public".to_string(),
            name: "t".to_string(),
            column_schemas: vec![
                ColumnSchema {
                    name: "id".to_string(),
                    typ: Type::INT4,
                    nullable: false,
                    primary: true,
                },
                ColumnSchema {
                    name: "v".to_string(),
                    typ: Type::TEXT,
                    nullable: true,
                    primary: false,
                },
            ],
        }
    }

    fn table_config(engine: TableEngine) -> TableConfig {
        TableConfig {
            engine,
            sign_column: engine.requires_sign_column().then(|| "s".to_string()),
            version_column: engine.requires_version_column().then(|| "ver".to_string()),
            columns: vec!["id".to_string(), "v".to_string()],
            destination_table: None,
        }
    }

    fn adapter(engine: TableEngine) -> TableAdapter {
        TableAdapter::new(
            "t",
            &table_config(engine),
            &relation_info(),
            client(),
            &BatchConfig::default(),
        )
        .unwrap()
    }

    fn row(id: i32, v: &str) -> Row {
        Row::new(vec![Cell::I32(id), Cell::String(v.to_string())])
    }

    #[test]
    fn merge_tree_append() {
        let mut adapter = adapter(TableEngine::MergeTree);

        adapter.begin();
        adapter.insert(Lsn::from_raw(100), row(1, "a")).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::Int32(1),
                ClickHouseValue::String("a".to_string()),
            ]]
        );
    }

    #[test]
    fn merge_tree_update_emits_new_and_delete_is_dropped() {
        let mut adapter = adapter(TableEngine::MergeTree);

        adapter.begin();
        adapter
            .update(Lsn::from_raw(101), row(1, "a"), row(1, "b"))
            .unwrap();
        adapter.delete(Lsn::from_raw(102), row(1, "b")).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::Int32(1),
                ClickHouseValue::String("b".to_string()),
            ]]
        );
    }

    #[test]
    fn collapsing_update_emits_cancel_then_new() {
        let mut adapter = adapter(TableEngine::CollapsingMergeTree);

        adapter.begin();
        adapter
            .update(Lsn::from_raw(200), row(1, "a"), row(1, "b"))
            .unwrap();

        assert_eq!(
            adapter.buffered(),
            &[
                vec![
                    ClickHouseValue::Int32(1),
                    ClickHouseValue::String("a".to_string()),
                    ClickHouseValue::Int8(-1),
                ],
                vec![
                    ClickHouseValue::Int32(1),
                    ClickHouseValue::String("b".to_string()),
                    ClickHouseValue::Int8(1),
                ],
            ]
        );
    }

    #[test]
    fn collapsing_delete_emits_cancel_row() {
        let mut adapter = adapter(TableEngine::CollapsingMergeTree);

        adapter.begin();
        adapter.delete(Lsn::from_raw(250), row(7, "x")).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::Int32(7),
                ClickHouseValue::String("x".to_string()),
                ClickHouseValue::Int8(-1),
            ]]
        );
    }

    #[test]
    fn replacing_delete_emits_tombstone_with_lsn_version() {
        let mut adapter = adapter(TableEngine::ReplacingMergeTree);

        adapter.begin();
        adapter.delete(Lsn::from_raw(300), row(7, "x")).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::Int32(7),
                ClickHouseValue::String("x".to_string()),
                ClickHouseValue::UInt64(300),
            ]]
        );
    }

    #[test]
    fn replacing_mutations_carry_lsn_version() {
        let mut adapter = adapter(TableEngine::ReplacingMergeTree);

        adapter.begin();
        adapter.insert(Lsn::from_raw(10), row(1, "a")).unwrap();
        adapter
            .update(Lsn::from_raw(11), row(1, "a"), row(1, "b"))
            .unwrap();

        assert_eq!(adapter.pending_rows(), 2);
        assert_eq!(adapter.buffered()[0][2], ClickHouseValue::UInt64(10));
        assert_eq!(adapter.buffered()[1][2], ClickHouseValue::UInt64(11));
    }

    #[test]
    fn versioned_collapsing_appends_sign_then_version() {
        let mut adapter = adapter(TableEngine::VersionedCollapsingMergeTree);

        adapter.begin();
        adapter
            .update(Lsn::from_raw(400), row(1, "a"), row(1, "b"))
            .unwrap();

        assert_eq!(
            adapter.buffered(),
            &[
                vec![
                    ClickHouseValue::Int32(1),
                    ClickHouseValue::String("a".to_string()),
                    ClickHouseValue::Int8(-1),
                    ClickHouseValue::UInt64(400),
                ],
                vec![
                    ClickHouseValue::Int32(1),
                    ClickHouseValue::String("b".to_string()),
                    ClickHouseValue::Int8(1),
                    ClickHouseValue::UInt64(400),
                ],
            ]
        );
    }

    #[test]
    fn unchanged_toast_cells_are_resolved_from_old_row() {
        let info = RelationInfo {
            relation_id: RelationId::new(16384),
            schema: "public".to_string(),
            name: "t".to_string(),
            column_schemas: vec![
                ColumnSchema {
                    name: "id".to_string(),
                    typ: Type::INT4,
                    nullable: false,
                    primary: true,
                },
                ColumnSchema {
                    name: "big".to_string(),
                    typ: Type::TEXT,
                    nullable: true,
                    primary: false,
                },
                ColumnSchema {
                    name: "small".to_string(),
                    typ: Type::TEXT,
                    nullable: true,
                    primary: false,
                },
            ],
        };
        let config = TableConfig {
            engine: TableEngine::MergeTree,
            sign_column: None,
            version_column: None,
            columns: vec!["id".to_string(), "big".to_string(), "small".to_string()],
            destination_table: None,
        };
        let mut adapter =
            TableAdapter::new("t", &config, &info, client(), &BatchConfig::default()).unwrap();

        let old = Row::new(vec![
            Cell::I32(1),
            Cell::String("big".to_string()),
            Cell::String("small".to_string()),
        ]);
        let new = Row::new(vec![
            Cell::I32(1),
            Cell::Unchanged,
            Cell::String("smaller".to_string()),
        ]);

        adapter.begin();
        adapter.update(Lsn::from_raw(400), old, new).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::Int32(1),
                ClickHouseValue::String("big".to_string()),
                ClickHouseValue::String("smaller".to_string()),
            ]]
        );
    }

    #[test]
    fn begin_opens_a_fresh_batch() {
        let mut adapter = adapter(TableEngine::MergeTree);

        adapter.begin();
        adapter.insert(Lsn::from_raw(1), row(1, "a")).unwrap();
        assert_eq!(adapter.pending_rows(), 1);

        adapter.begin();
        assert_eq!(adapter.pending_rows(), 0);
    }

    #[test]
    fn projection_follows_configured_column_order() {
        let config = TableConfig {
            engine: TableEngine::MergeTree,
            sign_column: None,
            version_column: None,
            columns: vec!["v".to_string(), "id".to_string()],
            destination_table: None,
        };
        let mut adapter = TableAdapter::new(
            "t",
            &config,
            &relation_info(),
            client(),
            &BatchConfig::default(),
        )
        .unwrap();

        adapter.begin();
        adapter.insert(Lsn::from_raw(1), row(1, "a")).unwrap();

        assert_eq!(
            adapter.buffered(),
            &[vec![
                ClickHouseValue::String("a".to_string()),
                ClickHouseValue::Int32(1),
            ]]
        );
    }

    #[test]
    fn unknown_configured_column_is_a_config_error() {
        let mut config = table_config(TableEngine::MergeTree);
        config.columns.push("missing".to_string());

        let result = TableAdapter::new(
            "t",
            &config,
            &relation_info(),
            client(),
            &BatchConfig::default(),
        );

        assert!(matches!(
            result.map(|_| ()),
            Err(e) if e.kind() == ErrorKind::ConfigError
        ));
    }

    #[test]
    fn insert_statement_lists_engine_columns_last() {
        let adapter = adapter(TableEngine::VersionedCollapsingMergeTree);
        assert_eq!(
            adapter.insert_sql(),
            "INSERT INTO \"t\" (\"id\", \"v\", \"s\", \"ver\") FORMAT RowBinary"
        );
    }

    #[tokio::test]
    async fn empty_commit_skips_the_network() {
        let mut adapter = adapter(TableEngine::CollapsingMergeTree);

        adapter.begin();
        adapter.commit().await.unwrap();
    }
}
