//! The replication coordinator.
//!
//! Owns the run loop: bootstraps a consistent snapshot under a temporary
//! replication slot, then demultiplexes the decoded replication stream across
//! the table adapters while preserving source transaction boundaries, and
//! advances the durable watermark only after every flush of a commit frame
//! succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrep_config::shared::{DestinationConfig, ReplicatorConfig};
use secrecy::ExposeSecret;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clickhouse::client::ClickHouseClient;
use crate::concurrency::shutdown::{
    ShutdownRx, ShutdownTx, create_shutdown_channel, shutdown_requested,
};
use crate::engines::TableAdapter;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::metrics::register_metrics;
use crate::registry::RelationRegistry;
use crate::repl_error;
use crate::replication::client::PgReplicationClient;
use crate::replication::consumer::{StreamConsumer, WatermarkHandle};
use crate::types::{Lsn, SourceMessage};

/// Prefix of the temporary replication slot used for the snapshot bootstrap.
const TEMP_SLOT_PREFIX: &str = "chrep_tempslot";

/// Depth of the diagnostics error channel.
const ERROR_QUEUE_DEPTH: usize = 16;

/// The replicator service: bootstrap, stream, drain.
pub struct Replicator {
    config: ReplicatorConfig,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
}

/// One iteration outcome of the coordinator select loop.
enum LoopEvent {
    Shutdown,
    Message(Option<(SourceMessage, Lsn)>),
}

impl Replicator {
    /// Creates a replicator from a validated configuration.
    pub fn new(config: ReplicatorConfig) -> Self {
        register_metrics();
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        Self {
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Returns a handle that triggers graceful shutdown.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Runs the replicator until shutdown or a terminal error.
    pub async fn run(mut self) -> ReplResult<()> {
        // Destination first: there is no point creating source state when the
        // destination is unreachable.
        let ch_client = self.connect_clickhouse().await?;

        let bootstrap_client =
            PgReplicationClient::connect(&self.config.pipeline.pg_connection).await?;
        let (registry, mut adapters, start_lsn) =
            self.bootstrap(&bootstrap_client, &ch_client).await?;

        // The streaming consumer uses its own connection; closing the
        // bootstrap connection also removes the temporary slot server-side.
        drop(bootstrap_client);

        let streaming_client =
            PgReplicationClient::connect(&self.config.pipeline.pg_connection).await?;

        let (watermark, watermark_rx) = WatermarkHandle::new(start_lsn);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_DEPTH);
        let error_drain = spawn_error_logger(errors_rx);

        let mut consumer = StreamConsumer::start(
            streaming_client,
            Arc::clone(&registry),
            &self.config.pipeline.publication_name,
            &self.config.pipeline.replication_slot_name,
            start_lsn,
            watermark_rx,
            self.shutdown_tx.subscribe(),
            errors_tx,
        )
        .await?;

        let mut coordinator = Coordinator::new(registry, adapters, start_lsn, watermark);

        info!(%start_lsn, "entering streaming state");

        let mut run_error: Option<ReplError> = None;
        loop {
            let event = select! {
                _ = shutdown_requested(&mut self.shutdown_rx) => LoopEvent::Shutdown,
                message = consumer.next() => LoopEvent::Message(message),
            };

            match event {
                LoopEvent::Shutdown => {
                    info!("shutdown requested, draining");
                    break;
                }
                LoopEvent::Message(Some((message, lsn))) => {
                    if let Err(err) = coordinator.handle_message(message, lsn).await {
                        run_error = Some(err);
                        break;
                    }
                }
                LoopEvent::Message(None) => {
                    // Consumer finished on its own; wait() below reveals why.
                    break;
                }
            }
        }

        // Drain: stop the consumer, collect its outcome, close the adapters.
        self.shutdown_tx.shutdown();
        if let Err(err) = consumer.wait().await {
            error!(error = %err, "consumer terminated with error");
            run_error.get_or_insert(err);
        }
        let _ = error_drain.await;

        adapters = coordinator.into_adapters();
        for (table_name, adapter) in adapters.iter_mut() {
            if let Err(err) = adapter.close().await {
                error!(table = %table_name, error = %err, "could not close table adapter");
            }
        }

        match run_error {
            Some(err) => Err(err),
            None => {
                info!("replicator stopped");
                Ok(())
            }
        }
    }

    async fn connect_clickhouse(&self) -> ReplResult<ClickHouseClient> {
        let DestinationConfig::ClickHouse {
            url,
            user,
            password,
            database,
        } = &self.config.destination;

        let client = ClickHouseClient::new(
            url.clone(),
            user.clone(),
            password.as_ref().map(|p| p.expose_secret().to_string()),
            database.clone(),
        );
        client.ping().await?;

        info!(url = %url, database = %database, "connected to clickhouse");

        Ok(client)
    }

    /// Bootstraps the consistent snapshot.
    ///
    /// Creates the temporary slot (which opens the snapshot transaction),
    /// loads the registry, builds the adapters, and syncs every table. The
    /// slot is dropped and the transaction rolled back on both the success
    /// and failure paths; the slot is additionally self-dropping on
    /// disconnect.
    async fn bootstrap(
        &self,
        bootstrap: &PgReplicationClient,
        ch_client: &ClickHouseClient,
    ) -> ReplResult<(Arc<RelationRegistry>, BTreeMap<String, TableAdapter>, Lsn)> {
        let temp_slot_name = format!("{TEMP_SLOT_PREFIX}_{}", std::process::id());
        let slot = bootstrap.create_temp_slot(&temp_slot_name).await?;
        let start_lsn = slot.consistent_point;

        info!(
            slot = %slot.slot_name,
            %start_lsn,
            snapshot = slot.snapshot_name.as_deref().unwrap_or(""),
            plugin = slot.output_plugin.as_deref().unwrap_or(""),
            "created temporary replication slot"
        );

        let result = self
            .bootstrap_under_snapshot(bootstrap, ch_client, start_lsn)
            .await;

        if let Err(err) = bootstrap.drop_slot(&slot.slot_name).await {
            warn!(error = %err, "could not drop temporary slot (removed on disconnect)");
        }
        if let Err(err) = bootstrap.rollback_tx().await {
            warn!(error = %err, "could not roll back snapshot transaction");
        }

        let (registry, adapters) = result?;

        Ok((Arc::new(registry), adapters, start_lsn))
    }

    async fn bootstrap_under_snapshot(
        &self,
        bootstrap: &PgReplicationClient,
        ch_client: &ClickHouseClient,
        start_lsn: Lsn,
    ) -> ReplResult<(RelationRegistry, BTreeMap<String, TableAdapter>)> {
        let registry = RelationRegistry::load(
            bootstrap,
            &self.config.pipeline.publication_name,
            self.config
                .tables
                .iter()
                .map(|(name, config)| (name.as_str(), config)),
        )
        .await?;

        let mut adapters = BTreeMap::new();
        for (table_name, table_config) in &self.config.tables {
            let Some(info) = registry.get_by_name(table_name) else {
                return Err(repl_error!(
                    ErrorKind::ConfigError,
                    "configured table is not part of the publication",
                    format!(
                        "table {table_name} not found in publication {}",
                        self.config.pipeline.publication_name
                    )
                ));
            };

            let adapter = TableAdapter::new(
                table_name,
                table_config,
                info,
                ch_client.clone(),
                &self.config.pipeline.batch,
            )?;

            adapter.sync(bootstrap, info, start_lsn).await?;
            adapters.insert(table_name.clone(), adapter);
        }

        Ok((registry, adapters))
    }
}

/// The streaming state machine: registry, adapters, per-frame table set, and
/// the durable watermark.
///
/// Exclusively owned and driven by the coordinator task; adapters are not
/// internally thread-safe and do not need to be.
struct Coordinator {
    registry: Arc<RelationRegistry>,
    adapters: BTreeMap<String, TableAdapter>,
    /// Messages below this LSN belong to the snapshot and are dropped.
    start_lsn: Lsn,
    /// Commit LSN of the transaction frame currently being processed.
    final_lsn: Lsn,
    /// Tables touched in the current transaction frame.
    tx_tables: BTreeSet<String>,
    watermark: WatermarkHandle,
}

impl Coordinator {
    fn new(
        registry: Arc<RelationRegistry>,
        adapters: BTreeMap<String, TableAdapter>,
        start_lsn: Lsn,
        watermark: WatermarkHandle,
    ) -> Self {
        Self {
            registry,
            adapters,
            start_lsn,
            final_lsn: Lsn::ZERO,
            tx_tables: BTreeSet::new(),
            watermark,
        }
    }

    fn into_adapters(self) -> BTreeMap<String, TableAdapter> {
        self.adapters
    }

    /// Applies one decoded message observed at `lsn`.
    async fn handle_message(&mut self, message: SourceMessage, lsn: Lsn) -> ReplResult<()> {
        // Messages below the bootstrap watermark belong to the snapshot's own
        // transaction and were already captured by the initial copy.
        if lsn < self.start_lsn {
            debug!(%lsn, start_lsn = %self.start_lsn, "message predates bootstrap, ignoring");
            return Ok(());
        }

        match message {
            SourceMessage::Begin(_) => {
                self.tx_tables = BTreeSet::new();
            }
            SourceMessage::Commit(commit) => {
                self.final_lsn = commit.commit_lsn;

                // Sequential, deterministic order; the first error aborts the
                // frame and the watermark is left untouched.
                for table_name in std::mem::take(&mut self.tx_tables) {
                    let Some(adapter) = self.adapters.get_mut(&table_name) else {
                        return Err(repl_error!(
                            ErrorKind::InvalidState,
                            "touched table has no adapter",
                            table_name
                        ));
                    };

                    adapter.commit().await.map_err(|e| {
                        repl_error!(
                            ErrorKind::FlushFailed,
                            "could not commit table batch",
                            format!("table {table_name}: {e}"),
                            source: e
                        )
                    })?;
                }

                self.watermark.advance(lsn);
                debug!(commit_lsn = %self.final_lsn, watermark = %lsn, "transaction frame committed");
            }
            SourceMessage::Insert {
                relation_id,
                new_row,
            } => {
                if let Some(adapter) = self.touch_table(relation_id) {
                    adapter.insert(lsn, new_row)?;
                }
            }
            SourceMessage::Update {
                relation_id,
                old_row,
                new_row,
            } => {
                if let Some(adapter) = self.touch_table(relation_id) {
                    adapter.update(lsn, old_row, new_row)?;
                }
            }
            SourceMessage::Delete {
                relation_id,
                old_row,
            } => {
                if let Some(adapter) = self.touch_table(relation_id) {
                    adapter.delete(lsn, old_row)?;
                }
            }
            SourceMessage::Relation { .. }
            | SourceMessage::Origin
            | SourceMessage::Type
            | SourceMessage::Truncate { .. } => {}
        }

        Ok(())
    }

    /// Resolves a relation to its adapter, lazily opening the adapter's batch
    /// on the first touch within the current transaction frame.
    ///
    /// Unknown or unconfigured relations yield [`None`] and are ignored.
    fn touch_table(&mut self, relation_id: crate::types::RelationId) -> Option<&mut TableAdapter> {
        let table_name = self.registry.resolve(relation_id)?.name.clone();
        let adapter = self.adapters.get_mut(&table_name)?;

        if self.tx_tables.insert(table_name) {
            adapter.begin();
        }

        Some(adapter)
    }
}

/// Drains the diagnostics error channel into the log.
///
/// Exists so the consumer never blocks on an unread channel; control flow
/// never depends on it.
fn spawn_error_logger(mut errors_rx: mpsc::Receiver<ReplError>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(err) = errors_rx.recv().await {
            error!(error = %err, "replication error reported");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RelationInfo;
    use crate::types::{BeginMessage, Cell, ColumnSchema, CommitMessage, RelationId, Row};
    use chrep_config::shared::{BatchConfig, TableConfig, TableEngine};
    use tokio_postgres::types::Type;

    const START_LSN: u64 = 500;

    fn relation_info() -> RelationInfo {
        RelationInfo {
            relation_id: RelationId::new(1),
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

    fn coordinator() -> (Coordinator, tokio::sync::watch::Receiver<Lsn>) {
        let mut registry = RelationRegistry::default();
        registry.insert(relation_info());

        let config = TableConfig {
            engine: TableEngine::CollapsingMergeTree,
            sign_column: Some("s".to_string()),
            version_column: None,
            columns: vec!["id".to_string(), "v".to_string()],
            destination_table: None,
        };
        let client = ClickHouseClient::new("http://localhost:8123", "default", None, "default");
        let adapter = TableAdapter::new(
            "t",
            &config,
            &relation_info(),
            client,
            &BatchConfig::default(),
        )
        .unwrap();

        let mut adapters = BTreeMap::new();
        adapters.insert("t".to_string(), adapter);

        let (watermark, watermark_rx) = WatermarkHandle::new(Lsn::from_raw(START_LSN));

        (
            Coordinator::new(
                Arc::new(registry),
                adapters,
                Lsn::from_raw(START_LSN),
                watermark,
            ),
            watermark_rx,
        )
    }

    fn begin(lsn: u64) -> SourceMessage {
        SourceMessage::Begin(BeginMessage {
            final_lsn: Lsn::from_raw(lsn + 1),
            timestamp: 0,
            xid: 1,
        })
    }

    fn commit(lsn: u64) -> SourceMessage {
        SourceMessage::Commit(CommitMessage {
            commit_lsn: Lsn::from_raw(lsn),
            end_lsn: Lsn::from_raw(lsn + 1),
            timestamp: 0,
        })
    }

    fn insert(relation_id: u32, id: i32, v: &str) -> SourceMessage {
        SourceMessage::Insert {
            relation_id: RelationId::new(relation_id),
            new_row: Row::new(vec![Cell::I32(id), Cell::String(v.to_string())]),
        }
    }

    #[tokio::test]
    async fn pre_bootstrap_messages_are_suppressed() {
        let (mut coordinator, _rx) = coordinator();

        coordinator
            .handle_message(insert(1, 1, "a"), Lsn::from_raw(400))
            .await
            .unwrap();

        assert_eq!(coordinator.adapters["t"].pending_rows(), 0);
        assert!(coordinator.tx_tables.is_empty());
    }

    #[tokio::test]
    async fn unknown_relation_is_ignored() {
        let (mut coordinator, rx) = coordinator();

        coordinator
            .handle_message(begin(700), Lsn::from_raw(700))
            .await
            .unwrap();
        coordinator
            .handle_message(insert(9999, 1, "a"), Lsn::from_raw(700))
            .await
            .unwrap();

        assert_eq!(coordinator.adapters["t"].pending_rows(), 0);
        assert_eq!(*rx.borrow(), Lsn::from_raw(START_LSN));

        // The empty frame still commits and advances the watermark.
        coordinator
            .handle_message(commit(701), Lsn::from_raw(701))
            .await
            .unwrap();
        assert_eq!(*rx.borrow(), Lsn::from_raw(701));
    }

    #[tokio::test]
    async fn first_touch_lazily_begins_the_adapter_batch() {
        let (mut coordinator, _rx) = coordinator();

        coordinator
            .handle_message(begin(600), Lsn::from_raw(600))
            .await
            .unwrap();
        coordinator
            .handle_message(insert(1, 1, "a"), Lsn::from_raw(600))
            .await
            .unwrap();
        coordinator
            .handle_message(insert(1, 2, "b"), Lsn::from_raw(600))
            .await
            .unwrap();

        assert_eq!(coordinator.adapters["t"].pending_rows(), 2);
        assert!(coordinator.tx_tables.contains("t"));
    }

    #[tokio::test]
    async fn begin_resets_the_frame_table_set() {
        let (mut coordinator, _rx) = coordinator();

        coordinator
            .handle_message(begin(600), Lsn::from_raw(600))
            .await
            .unwrap();
        coordinator
            .handle_message(insert(1, 1, "a"), Lsn::from_raw(600))
            .await
            .unwrap();

        // A new frame re-begins the adapter on first touch, discarding the
        // rows of the never-committed previous frame.
        coordinator
            .handle_message(begin(800), Lsn::from_raw(800))
            .await
            .unwrap();
        assert!(coordinator.tx_tables.is_empty());

        coordinator
            .handle_message(insert(1, 3, "c"), Lsn::from_raw(800))
            .await
            .unwrap();
        assert_eq!(coordinator.adapters["t"].pending_rows(), 1);
    }

    #[tokio::test]
    async fn commit_advances_the_watermark_monotonically() {
        let (mut coordinator, rx) = coordinator();

        coordinator
            .handle_message(begin(700), Lsn::from_raw(700))
            .await
            .unwrap();
        coordinator
            .handle_message(commit(701), Lsn::from_raw(701))
            .await
            .unwrap();
        assert_eq!(*rx.borrow(), Lsn::from_raw(701));

        // A replayed older commit frame never moves the watermark backwards.
        coordinator
            .handle_message(begin(600), Lsn::from_raw(600))
            .await
            .unwrap();
        coordinator
            .handle_message(commit(601), Lsn::from_raw(601))
            .await
            .unwrap();
        assert_eq!(*rx.borrow(), Lsn::from_raw(701));
    }

    #[tokio::test]
    async fn commit_records_the_frame_commit_lsn() {
        let (mut coordinator, _rx) = coordinator();

        coordinator
            .handle_message(begin(700), Lsn::from_raw(700))
            .await
            .unwrap();
        coordinator
            .handle_message(commit(701), Lsn::from_raw(701))
            .await
            .unwrap();

        assert_eq!(coordinator.final_lsn, Lsn::from_raw(701));
    }
}
