use chrep_config::load_config;
use chrep_config::shared::ReplicatorConfig;

use crate::error::ReplicatorResult;

/// Loads and validates the replicator configuration.
pub fn load_replicator_config() -> ReplicatorResult<ReplicatorConfig> {
    let config: ReplicatorConfig = load_config()?;
    config.validate()?;

    Ok(config)
}
