//! Replicator service binary.
//!
//! Loads configuration, initializes tracing, starts the async runtime, and
//! runs the replication pipeline with graceful shutdown on termination
//! signals.

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::ReplicatorResult;

mod config;
mod core;
mod error;

fn main() -> ReplicatorResult<()> {
    // Load the config before anything else so a broken config fails fast,
    // then initialize tracing so everything from here on is logged.
    let replicator_config = load_replicator_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if let Err(err) = runtime.block_on(start_replicator_with_config(replicator_config)) {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
