use chrep::replicator::Replicator;
use chrep_config::shared::{DestinationConfig, PipelineConfig, ReplicatorConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::error::ReplicatorResult;

/// Starts the replicator with the provided configuration and runs it until
/// shutdown or a terminal error.
pub async fn start_replicator_with_config(
    replicator_config: ReplicatorConfig,
) -> ReplicatorResult<()> {
    info!("starting replicator service");

    log_config(&replicator_config);

    let replicator = Replicator::new(replicator_config);
    let shutdown_tx = replicator.shutdown_tx();

    // Translate process termination signals into the shared shutdown channel.
    let signal_handle = tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to register SIGQUIT");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
            }
            _ = sighup.recv() => {
                info!("sighup received, shutting down");
            }
            _ = sigquit.recv() => {
                info!("sigquit received, shutting down");
            }
        }

        shutdown_tx.shutdown();
    });

    let result = replicator.run().await;

    // If the replicator finished before any signal arrived, the watcher is
    // still parked on the signal futures; it is not needed anymore.
    signal_handle.abort();
    let _ = signal_handle.await;

    result?;

    info!("replicator service completed");

    Ok(())
}

fn log_config(config: &ReplicatorConfig) {
    log_pipeline_config(&config.pipeline);
    log_destination_config(&config.destination);

    for (table_name, table_config) in &config.tables {
        debug!(
            table = %table_name,
            engine = %table_config.engine,
            columns = table_config.columns.len(),
            sign_column = table_config.sign_column.as_deref().unwrap_or(""),
            version_column = table_config.version_column.as_deref().unwrap_or(""),
            "table config"
        );

        if !table_config.engine.absorbs_replays() {
            warn!(
                table = %table_name,
                "MergeTree does not absorb replayed frames; duplicates are possible after a crash"
            );
        }
    }
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        publication_name = %config.publication_name,
        replication_slot_name = %config.replication_slot_name,
        host = %config.pg_connection.host,
        port = config.pg_connection.port,
        dbname = %config.pg_connection.name,
        username = %config.pg_connection.username,
        "pipeline config"
    );
}

fn log_destination_config(config: &DestinationConfig) {
    let DestinationConfig::ClickHouse { url, user, database, .. } = config;
    debug!(url = %url, user = %user, database = %database, "clickhouse destination config");
}
