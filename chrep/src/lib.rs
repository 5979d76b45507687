//! Continuous replication from Postgres logical decoding into ClickHouse
//! merge-tree tables.
//!
//! The [`replicator::Replicator`] bootstraps a consistent snapshot under a
//! temporary replication slot, then streams decoded changes and folds them
//! into per-table batches whose encoding is dictated by the destination
//! table's merge-tree engine variant.

pub mod clickhouse;
pub mod concurrency;
pub mod conversions;
pub mod engines;
pub mod error;
mod macros;
pub mod metrics;
pub mod registry;
pub mod replication;
pub mod replicator;
pub mod types;
