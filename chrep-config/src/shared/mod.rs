//! Shared configuration types for the replicator.

mod batch;
mod connection;
mod destination;
mod pipeline;
mod replicator;
mod table;
mod validation;

pub use batch::BatchConfig;
pub use connection::{
    CHREP_REPLICATION_OPTIONS, IntoConnectOptions, PgConnectionConfig, PgConnectionOptions,
    TcpKeepaliveConfig,
};
pub use destination::DestinationConfig;
pub use pipeline::PipelineConfig;
pub use replicator::ReplicatorConfig;
pub use table::{TableConfig, TableEngine};
pub use validation::ValidationError;
