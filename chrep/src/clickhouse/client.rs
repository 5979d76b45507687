use std::sync::Arc;
use std::time::Instant;

use clickhouse::Client;

use crate::clickhouse::encoding::{ClickHouseValue, rb_encode_row};
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::metrics::CHREP_CH_INSERT_DURATION_SECONDS;
use crate::repl_error;

/// Capacity of the internal write buffer used per INSERT statement.
///
/// When this many bytes have been written to the buffer it is flushed to the
/// network (the INSERT statement itself is only closed when `end()` is called
/// or the `max_bytes_per_insert` limit is reached).
const BUFFERED_CAPACITY: usize = 256 * 1024;

/// High-level ClickHouse client shared by every table adapter.
///
/// Wraps a [`clickhouse::Client`] and exposes typed methods for connectivity
/// checks and RowBinary bulk inserts. Cheaply cloneable — the inner client
/// holds an `Arc` internally, and the outer `Arc` here ensures a single shared
/// instance.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Arc<Client>,
}

impl ClickHouseClient {
    /// Creates a new [`ClickHouseClient`].
    ///
    /// When `url` starts with `https://`, TLS is handled automatically by the
    /// `rustls-tls` feature using webpki root certificates.
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: Option<String>,
        database: impl Into<String>,
    ) -> Self {
        let mut client = Client::default()
            .with_url(url)
            .with_user(user)
            .with_database(database);

        if let Some(pw) = password {
            client = client.with_password(pw);
        }

        Self {
            inner: Arc::new(client),
        }
    }

    /// Round-trips a trivial query to verify connectivity and credentials.
    pub async fn ping(&self) -> ReplResult<()> {
        self.inner
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map(|_| ())
            .map_err(|e| {
                repl_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "clickhouse connectivity check failed",
                    e
                )
            })
    }

    /// Inserts `rows` using the prepared `insert_sql` statement
    /// (`INSERT INTO "t" ("c1", …) FORMAT RowBinary`).
    ///
    /// Each element of `rows` is a complete, already-encoded row of
    /// [`ClickHouseValue`]s in statement column order. `nullable_flags` must
    /// have the same length as each row.
    ///
    /// When the accumulated uncompressed byte count reaches
    /// `max_bytes_per_insert` the current INSERT statement is committed and a
    /// new one is opened, keeping peak memory usage bounded for large initial
    /// copies.
    pub(crate) async fn insert_rows(
        &self,
        table_name: &str,
        insert_sql: &str,
        rows: Vec<Vec<ClickHouseValue>>,
        nullable_flags: &[bool],
        max_bytes_per_insert: u64,
        source: &'static str,
    ) -> ReplResult<()> {
        let mut insert = self
            .inner
            .insert_formatted_with(insert_sql.to_string())
            .buffered_with_capacity(BUFFERED_CAPACITY);
        let mut bytes = 0u64;
        let mut row_buf = Vec::new();
        let mut insert_start = Instant::now();

        for row in rows {
            row_buf.clear();
            rb_encode_row(row, nullable_flags, &mut row_buf)?;

            insert.write_buffered(&row_buf);
            bytes += row_buf.len() as u64;

            if bytes >= max_bytes_per_insert {
                insert.end().await.map_err(|e| {
                    repl_error!(
                        ErrorKind::FlushFailed,
                        "clickhouse insert flush failed",
                        format!("failed to flush INSERT for '{table_name}': {e}")
                    )
                })?;
                metrics::histogram!(
                    CHREP_CH_INSERT_DURATION_SECONDS,
                    "table" => table_name.to_string(),
                    "source" => source
                )
                .record(insert_start.elapsed().as_secs_f64());

                insert = self
                    .inner
                    .insert_formatted_with(insert_sql.to_string())
                    .buffered_with_capacity(BUFFERED_CAPACITY);
                insert_start = Instant::now();
                bytes = 0;
            }
        }

        insert.end().await.map_err(|e| {
            repl_error!(
                ErrorKind::FlushFailed,
                "clickhouse insert flush failed",
                format!("failed to flush INSERT for '{table_name}': {e}")
            )
        })?;
        metrics::histogram!(
            CHREP_CH_INSERT_DURATION_SECONDS,
            "table" => table_name.to_string(),
            "source" => source
        )
        .record(insert_start.elapsed().as_secs_f64());

        Ok(())
    }
}
