//! Configuration types and loading for the chrep replicator.
//!
//! Configuration is assembled from a base file, an environment-specific file,
//! and `APP_`-prefixed environment variable overrides.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
