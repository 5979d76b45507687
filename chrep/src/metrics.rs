use std::sync::Once;

use metrics::{Unit, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Duration of a single RowBinary INSERT statement from first write to server acknowledgement.
/// Labels: `table`, `source` (`copy` = initial table sync, `streaming` = CDC events).
pub const CHREP_CH_INSERT_DURATION_SECONDS: &str = "chrep_ch_insert_duration_seconds";

/// Duration of the initial COPY of a single table, from first row to last flush.
/// Labels: `table`.
pub const CHREP_TABLE_SYNC_DURATION_SECONDS: &str = "chrep_table_sync_duration_seconds";

/// Register replicator metrics.
///
/// Safe to call multiple times — registration happens only once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_histogram!(
            CHREP_CH_INSERT_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of RowBinary INSERT statements from first write to server acknowledgement, labeled by table and source"
        );

        describe_histogram!(
            CHREP_TABLE_SYNC_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of the initial COPY of a single table, labeled by table"
        );
    });
}
