use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use postgres_replication::LogicalReplicationStream;
use postgres_replication::protocol::{LogicalReplicationMessage, ReplicationMessage};
use tokio_postgres::CopyOutStream;
use tokio_postgres::types::PgLsn;
use tracing::debug;

use crate::conversions::text::parse_copy_text_row;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::repl_error;
use crate::types::{ColumnSchema, Lsn, Row};

/// The amount of milliseconds between two consecutive status updates in case
/// no forced update is requested.
const STATUS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Seconds between the Unix epoch and the Postgres epoch (2000-01-01 00:00:00 UTC).
const POSTGRES_EPOCH_UNIX_SECS: u64 = 946_684_800;

fn postgres_epoch() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(POSTGRES_EPOCH_UNIX_SECS)
}

pin_project! {
    /// A stream that yields rows from a Postgres COPY operation.
    ///
    /// Wraps a [`CopyOutStream`] and converts each text-format line into a
    /// [`Row`] using the provided column schemas.
    #[must_use = "streams do nothing unless polled"]
    pub struct TableCopyStream<'a> {
        #[pin]
        stream: CopyOutStream,
        column_schemas: &'a [ColumnSchema],
    }
}

impl<'a> TableCopyStream<'a> {
    /// Creates a new [`TableCopyStream`] from a [`CopyOutStream`] and column schemas.
    pub fn wrap(stream: CopyOutStream, column_schemas: &'a [ColumnSchema]) -> Self {
        Self {
            stream,
            column_schemas,
        }
    }
}

impl<'a> Stream for TableCopyStream<'a> {
    type Item = ReplResult<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(line)) => match parse_copy_text_row(&line, this.column_schemas) {
                Ok(row) => Poll::Ready(Some(Ok(row))),
                Err(err) => Poll::Ready(Some(Err(err))),
            },
            Some(Err(err)) => Poll::Ready(Some(Err(err.into()))),
            None => Poll::Ready(None),
        }
    }
}

pin_project! {
    /// The logical replication stream together with standby status tracking.
    pub struct EventsStream {
        #[pin]
        stream: LogicalReplicationStream,
        last_update: Option<Instant>,
        last_flush_lsn: Option<PgLsn>,
        last_apply_lsn: Option<PgLsn>,
    }
}

impl EventsStream {
    /// Creates a new [`EventsStream`] from a [`LogicalReplicationStream`].
    pub fn wrap(stream: LogicalReplicationStream) -> Self {
        Self {
            stream,
            last_update: None,
            last_flush_lsn: None,
            last_apply_lsn: None,
        }
    }

    /// Sends a standby status update to the server.
    ///
    /// `write_lsn` is the last position received, `flush_lsn`/`apply_lsn` the
    /// durable watermark. Forced updates (requested by the server through a
    /// keepalive) are always sent; voluntary updates are skipped while the
    /// durable positions are unchanged and the last update is recent, so the
    /// stream does not spam the server once per received message.
    pub async fn send_status_update(
        self: Pin<&mut Self>,
        write_lsn: Lsn,
        flush_lsn: Lsn,
        apply_lsn: Lsn,
        force: bool,
    ) -> ReplResult<()> {
        let this = self.project();

        let write_lsn = PgLsn::from(write_lsn);
        let flush_lsn = PgLsn::from(flush_lsn);
        let apply_lsn = PgLsn::from(apply_lsn);

        if !force
            && let (Some(last_update), Some(last_flush), Some(last_apply)) = (
                this.last_update.as_mut(),
                this.last_flush_lsn.as_mut(),
                this.last_apply_lsn.as_mut(),
            )
            && flush_lsn == *last_flush
            && apply_lsn == *last_apply
            && last_update.elapsed() < STATUS_UPDATE_INTERVAL
        {
            return Ok(());
        }

        // The client's system clock at the time of transmission, as
        // microseconds since midnight on 2000-01-01.
        let ts = postgres_epoch()
            .elapsed()
            .map_err(|e| {
                repl_error!(
                    ErrorKind::InvalidState,
                    "system clock is before the postgres epoch",
                    e.to_string()
                )
            })?
            .as_micros() as i64;

        this.stream
            .standby_status_update(write_lsn, flush_lsn, apply_lsn, ts, 0)
            .await?;

        debug!(%write_lsn, %flush_lsn, %apply_lsn, "status update sent");

        *this.last_update = Some(Instant::now());
        *this.last_flush_lsn = Some(flush_lsn);
        *this.last_apply_lsn = Some(apply_lsn);

        Ok(())
    }
}

impl Stream for EventsStream {
    type Item = ReplResult<ReplicationMessage<LogicalReplicationMessage>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.stream.poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
