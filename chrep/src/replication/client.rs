use std::str::FromStr;
use std::sync::Arc;

use chrep_config::shared::{CHREP_REPLICATION_OPTIONS, IntoConnectOptions, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use postgres_replication::LogicalReplicationStream;
use tokio_postgres::{
    Client, Config, CopyOutStream, NoTls, SimpleQueryMessage, SimpleQueryRow,
    config::ReplicationMode,
};
use tracing::{error, info};

use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::types::{ColumnSchema, Lsn, RelationId, ReplicaIdentity};
use crate::{bail, repl_error};

/// Spawns a background task to monitor a Postgres connection until it terminates.
///
/// There is no need to track the task via its `JoinHandle`: dropping the
/// `Client` terminates the connection, which ends the task.
fn spawn_postgres_connection(
    connection: tokio_postgres::Connection<tokio_postgres::Socket, tokio_postgres::tls::NoTlsStream>,
) {
    tokio::spawn(async move {
        match connection.await {
            Err(err) => error!(error = %err, "postgres connection error"),
            Ok(()) => info!("postgres connection terminated"),
        }
    });
}

/// Result returned when creating a temporary replication slot with an
/// exported snapshot.
#[derive(Debug, Clone)]
pub struct TempSlot {
    /// Name of the created slot.
    pub slot_name: String,
    /// The LSN at which the slot was created, representing a consistent point
    /// in the WAL. This is the coordinator's start LSN.
    pub consistent_point: Lsn,
    /// Name of the snapshot exported by the slot creation.
    pub snapshot_name: Option<String>,
    /// The logical decoding output plugin backing the slot.
    pub output_plugin: Option<String>,
}

/// A catalog triple describing one table of a publication.
#[derive(Debug, Clone)]
pub struct PublicationTable {
    pub relation_id: RelationId,
    pub schema: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
}

/// A client for interacting with Postgres's logical replication features.
///
/// This client provides methods for creating replication slots, running the
/// snapshot transaction, and streaming changes from the database.
#[derive(Debug, Clone)]
pub struct PgReplicationClient {
    client: Arc<Client>,
}

impl PgReplicationClient {
    /// Establishes a connection to Postgres configured for logical replication.
    pub async fn connect(pg_connection_config: &PgConnectionConfig) -> ReplResult<Self> {
        let mut config: Config =
            pg_connection_config.with_db(Some(&CHREP_REPLICATION_OPTIONS));
        config.replication_mode(ReplicationMode::Logical);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            repl_error!(
                ErrorKind::SourceConnectionFailed,
                "could not connect to postgres",
                format!(
                    "{}:{}/{}: {e}",
                    pg_connection_config.host, pg_connection_config.port, pg_connection_config.name
                ),
                source: e
            )
        })?;

        spawn_postgres_connection(connection);

        info!(
            host = %pg_connection_config.host,
            port = %pg_connection_config.port,
            dbname = %pg_connection_config.name,
            "connected to postgres"
        );

        Ok(PgReplicationClient {
            client: Arc::new(client),
        })
    }

    /// Begins the snapshot transaction and creates a temporary logical
    /// replication slot whose exported snapshot the transaction uses.
    ///
    /// The temporary slot is automatically removed by the server when this
    /// connection closes, which makes bootstrap crash-safe from the source's
    /// perspective.
    pub async fn create_temp_slot(&self, slot_name: &str) -> ReplResult<TempSlot> {
        self.client
            .simple_query("begin read only isolation level repeatable read;")
            .await?;

        // Replication commands must stay uppercase: the replication command
        // lexer in Postgres does not fold case.
        let query = format!(
            r#"CREATE_REPLICATION_SLOT {} TEMPORARY LOGICAL pgoutput USE_SNAPSHOT"#,
            quote_identifier(slot_name),
        );

        let results = self.client.simple_query(&query).await.map_err(|e| {
            repl_error!(
                ErrorKind::ReplicationSlotError,
                "could not create temporary replication slot",
                format!("slot '{slot_name}': {e}"),
                source: e
            )
        })?;

        for result in results {
            if let SimpleQueryMessage::Row(row) = result {
                let slot_name =
                    Self::get_row_value::<String>(&row, "slot_name", "replication slot")?;
                let consistent_point =
                    Self::get_row_value::<Lsn>(&row, "consistent_point", "replication slot")?;
                let snapshot_name = row.try_get("snapshot_name")?.map(String::from);
                let output_plugin = row.try_get("output_plugin")?.map(String::from);

                return Ok(TempSlot {
                    slot_name,
                    consistent_point,
                    snapshot_name,
                    output_plugin,
                });
            }
        }

        bail!(
            ErrorKind::ReplicationSlotError,
            "replication slot creation returned no row",
            format!("slot '{slot_name}'")
        );
    }

    /// Drops a replication slot by name.
    pub async fn drop_slot(&self, slot_name: &str) -> ReplResult<()> {
        let query = format!(r#"DROP_REPLICATION_SLOT {}"#, quote_identifier(slot_name));
        self.client.simple_query(&query).await.map_err(|e| {
            repl_error!(
                ErrorKind::ReplicationSlotError,
                "could not drop replication slot",
                format!("slot '{slot_name}': {e}"),
                source: e
            )
        })?;

        info!(slot_name, "dropped replication slot");

        Ok(())
    }

    /// Rolls back the current transaction.
    pub async fn rollback_tx(&self) -> ReplResult<()> {
        self.client.simple_query("rollback;").await?;

        Ok(())
    }

    /// Retrieves every ordinary table belonging to the named publication,
    /// with its OID, schema, name, and replica identity.
    pub async fn get_publication_tables(
        &self,
        publication_name: &str,
    ) -> ReplResult<Vec<PublicationTable>> {
        let query = format!(
            r#"
            select c.oid,
                   n.nspname,
                   c.relname,
                   c.relreplident
            from pg_class c
                   join pg_namespace n on n.oid = c.relnamespace
                   join pg_publication_tables pub
                     on (c.relname = pub.tablename and n.nspname = pub.schemaname)
            where c.relkind = 'r'
              and pub.pubname = {};
            "#,
            quote_literal(publication_name)
        );

        let mut tables = vec![];
        for message in self.client.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                let oid = Self::get_row_value::<u32>(&row, "oid", "pg_class")?;
                let schema = Self::get_row_value::<String>(&row, "nspname", "pg_namespace")?;
                let name = Self::get_row_value::<String>(&row, "relname", "pg_class")?;
                let replident =
                    Self::get_row_value::<String>(&row, "relreplident", "pg_class")?;

                tables.push(PublicationTable {
                    relation_id: RelationId::new(oid),
                    schema,
                    name,
                    replica_identity: ReplicaIdentity::from_catalog_char(&replident)?,
                });
            }
        }

        Ok(tables)
    }

    /// Retrieves schema information for all columns of a table.
    ///
    /// Dropped and generated columns are excluded; generated columns are not
    /// part of the logical replication stream.
    pub async fn get_column_schemas(
        &self,
        relation_id: RelationId,
    ) -> ReplResult<Vec<ColumnSchema>> {
        let query = format!(
            r#"
            select a.attname,
                   a.atttypid,
                   a.attnotnull,
                   coalesce(i.indisprimary, false) as primary
            from pg_attribute a
                   left join pg_index i
                     on a.attrelid = i.indrelid
                    and a.attnum = any(i.indkey)
                    and i.indisprimary = true
            where a.attnum > 0::int2
              and not a.attisdropped
              and a.attgenerated = ''
              and a.attrelid = {}
            order by a.attnum;
            "#,
            relation_id.into_inner()
        );

        let mut column_schemas = vec![];
        for message in self.client.simple_query(&query).await? {
            if let SimpleQueryMessage::Row(row) = message {
                let name = Self::get_row_value::<String>(&row, "attname", "pg_attribute")?;
                let type_oid = Self::get_row_value::<u32>(&row, "atttypid", "pg_attribute")?;
                let nullable =
                    Self::get_row_value::<String>(&row, "attnotnull", "pg_attribute")? == "f";
                let primary =
                    Self::get_row_value::<String>(&row, "primary", "pg_index")? == "t";

                let typ = tokio_postgres::types::Type::from_oid(type_oid)
                    .unwrap_or(tokio_postgres::types::Type::TEXT);

                column_schemas.push(ColumnSchema {
                    name,
                    typ,
                    nullable,
                    primary,
                });
            }
        }

        if column_schemas.is_empty() {
            bail!(
                ErrorKind::SourceSchemaError,
                "table has no columns",
                format!("relation {relation_id} returned no attributes")
            );
        }

        Ok(column_schemas)
    }

    /// Creates a COPY stream reading the selected columns of a table in text
    /// format, under the currently open snapshot transaction.
    pub async fn copy_out(
        &self,
        schema: &str,
        table: &str,
        column_names: &[String],
    ) -> ReplResult<CopyOutStream> {
        let column_list = column_names
            .iter()
            .map(|name| quote_identifier(name).into_owned())
            .collect::<Vec<_>>()
            .join(", ");

        let copy_query = format!(
            r#"copy (select {} from {}.{}) to stdout with (format text);"#,
            column_list,
            quote_identifier(schema),
            quote_identifier(table),
        );

        let stream = self.client.copy_out_simple(&copy_query).await.map_err(|e| {
            repl_error!(
                ErrorKind::SyncFailed,
                "could not start table copy",
                format!("table {schema}.{table}: {e}"),
                source: e
            )
        })?;

        Ok(stream)
    }

    /// Starts a logical replication stream from the specified publication and
    /// slot, beginning at `start_lsn`.
    pub async fn start_logical_replication(
        &self,
        publication_name: &str,
        slot_name: &str,
        start_lsn: Lsn,
    ) -> ReplResult<LogicalReplicationStream> {
        info!(publication_name, slot_name, %start_lsn, "starting logical replication");

        let options = format!(
            r#"("proto_version" '1', "publication_names" {})"#,
            quote_literal(quote_identifier(publication_name).as_ref()),
        );

        let query = format!(
            r#"START_REPLICATION SLOT {} LOGICAL {} {}"#,
            quote_identifier(slot_name),
            start_lsn,
            options
        );

        let copy_stream = self
            .client
            .copy_both_simple::<bytes::Bytes>(&query)
            .await
            .map_err(|e| {
                repl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "could not start replication stream",
                    format!("slot '{slot_name}': {e}"),
                    source: e
                )
            })?;
        let stream = LogicalReplicationStream::new(copy_stream);

        Ok(stream)
    }

    /// Helper to extract a value from a [`SimpleQueryMessage::Row`].
    fn get_row_value<T: FromStr>(
        row: &SimpleQueryRow,
        column_name: &str,
        table_name: &str,
    ) -> ReplResult<T>
    where
        T::Err: std::fmt::Debug,
    {
        let value = row.try_get(column_name)?.ok_or(repl_error!(
            ErrorKind::SourceSchemaError,
            "column not found in catalog result",
            format!("column '{column_name}' not found in '{table_name}'")
        ))?;

        value.parse().map_err(|e: T::Err| {
            repl_error!(
                ErrorKind::ConversionError,
                "catalog value parsing failed",
                format!("failed to parse column '{column_name}' of '{table_name}': {e:?}")
            )
        })
    }
}
