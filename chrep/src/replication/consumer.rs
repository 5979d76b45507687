use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use postgres_replication::protocol::ReplicationMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::{pin, select};
use tracing::{info, warn};

use crate::concurrency::shutdown::{ShutdownRx, shutdown_requested};
use crate::conversions::message::decode_message;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::registry::RelationRegistry;
use crate::repl_error;
use crate::replication::client::PgReplicationClient;
use crate::replication::stream::EventsStream;
use crate::types::{Lsn, SourceMessage};

/// Depth of the in-memory queue between the consumer task and the coordinator.
const MESSAGE_QUEUE_DEPTH: usize = 1024;

/// Interval between voluntary standby status updates.
///
/// Forced updates (server reply requests) are sent immediately regardless.
const STATUS_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Coordinator-side handle to the durable watermark.
///
/// The watermark is the latest LSN past which the source may discard log
/// segments. Advancement is monotonic by construction; stale values are
/// rejected, never sent.
#[derive(Debug, Clone)]
pub struct WatermarkHandle {
    tx: watch::Sender<Lsn>,
}

impl WatermarkHandle {
    /// Creates a watermark channel starting at `initial`.
    pub fn new(initial: Lsn) -> (Self, watch::Receiver<Lsn>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }

    /// Advances the watermark if `lsn` is strictly greater than the current
    /// value. Returns `true` when the watermark moved.
    pub fn advance(&self, lsn: Lsn) -> bool {
        self.tx.send_if_modified(|current| {
            if lsn > *current {
                *current = lsn;
                true
            } else {
                false
            }
        })
    }

    /// Returns the current watermark.
    pub fn current(&self) -> Lsn {
        *self.tx.borrow()
    }
}

/// Owns the streaming replication connection and decodes its messages.
///
/// The consumer runs as its own task; the coordinator pulls decoded messages
/// through [`StreamConsumer::next`] and pushes the watermark back through the
/// [`WatermarkHandle`] whose receiver is passed to [`StreamConsumer::start`].
/// The task independently acknowledges the watermark to the source as standby
/// status updates so WAL segments can be recycled.
pub struct StreamConsumer {
    messages_rx: mpsc::Receiver<(SourceMessage, Lsn)>,
    handle: JoinHandle<ReplResult<()>>,
    /// Keeps the streaming connection open for the lifetime of the stream.
    _client: PgReplicationClient,
}

impl StreamConsumer {
    /// Starts streaming from `slot_name` at `start_lsn` and spawns the
    /// consumer task.
    pub async fn start(
        client: PgReplicationClient,
        registry: Arc<RelationRegistry>,
        publication_name: &str,
        slot_name: &str,
        start_lsn: Lsn,
        watermark_rx: watch::Receiver<Lsn>,
        shutdown_rx: ShutdownRx,
        errors_tx: mpsc::Sender<ReplError>,
    ) -> ReplResult<Self> {
        let stream = client
            .start_logical_replication(publication_name, slot_name, start_lsn)
            .await?;

        let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_QUEUE_DEPTH);

        let handle = tokio::spawn(run_consumer(
            stream,
            registry,
            messages_tx,
            watermark_rx,
            shutdown_rx,
            errors_tx,
        ));

        Ok(Self {
            messages_rx,
            handle,
            _client: client,
        })
    }

    /// Receives the next decoded message, in LSN order.
    ///
    /// Returns [`None`] once the consumer task has finished, either because
    /// shutdown was requested or because the stream failed; [`Self::wait`]
    /// yields the outcome.
    pub async fn next(&mut self) -> Option<(SourceMessage, Lsn)> {
        self.messages_rx.recv().await
    }

    /// Waits for the consumer task to finish and returns its outcome.
    pub async fn wait(self) -> ReplResult<()> {
        // Dropping the receiver lets a blocked send in the task resolve.
        drop(self.messages_rx);

        self.handle.await.map_err(|e| {
            repl_error!(
                ErrorKind::InvalidState,
                "consumer task panicked",
                e.to_string()
            )
        })?
    }
}

/// One iteration outcome of the consumer select loop.
enum Tick {
    Shutdown,
    StatusUpdate,
    Message(Option<ReplResult<ReplicationMessage<postgres_replication::protocol::LogicalReplicationMessage>>>),
}

async fn run_consumer(
    stream: postgres_replication::LogicalReplicationStream,
    registry: Arc<RelationRegistry>,
    messages_tx: mpsc::Sender<(SourceMessage, Lsn)>,
    watermark_rx: watch::Receiver<Lsn>,
    mut shutdown_rx: ShutdownRx,
    errors_tx: mpsc::Sender<ReplError>,
) -> ReplResult<()> {
    let events = EventsStream::wrap(stream);
    pin!(events);

    let mut status_interval = tokio::time::interval(STATUS_UPDATE_INTERVAL);
    status_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Highest `wal_end` observed so far, reported as the write position.
    let mut last_write_lsn = Lsn::ZERO;

    loop {
        let tick = select! {
            _ = shutdown_requested(&mut shutdown_rx) => Tick::Shutdown,
            _ = status_interval.tick() => Tick::StatusUpdate,
            message = events.next() => Tick::Message(message),
        };

        match tick {
            Tick::Shutdown => {
                // Final acknowledgement attempt so a restart resumes as far
                // ahead as possible; failure here only widens the replay.
                let watermark = *watermark_rx.borrow();
                if let Err(err) = events
                    .as_mut()
                    .send_status_update(last_write_lsn, watermark, watermark, true)
                    .await
                {
                    warn!(error = %err, "final status update failed during shutdown");
                }

                info!("consumer stopped by shutdown signal");
                return Ok(());
            }
            Tick::StatusUpdate => {
                let watermark = *watermark_rx.borrow();
                if let Err(err) = events
                    .as_mut()
                    .send_status_update(last_write_lsn, watermark, watermark, false)
                    .await
                {
                    report_error(&errors_tx, &err);
                    return Err(err);
                }
            }
            Tick::Message(Some(Ok(ReplicationMessage::XLogData(body)))) => {
                let lsn = Lsn::from_raw(body.wal_start());
                let wal_end = Lsn::from_raw(body.wal_end());
                if wal_end > last_write_lsn {
                    last_write_lsn = wal_end;
                }

                match decode_message(&registry, &body.into_data()) {
                    Ok(Some(message)) => {
                        if messages_tx.send((message, lsn)).await.is_err() {
                            // Coordinator dropped its receiver; it is shutting down.
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        report_error(&errors_tx, &err);
                        return Err(err);
                    }
                }
            }
            Tick::Message(Some(Ok(ReplicationMessage::PrimaryKeepAlive(keepalive)))) => {
                let wal_end = Lsn::from_raw(keepalive.wal_end());
                if wal_end > last_write_lsn {
                    last_write_lsn = wal_end;
                }

                if keepalive.reply() == 1 {
                    let watermark = *watermark_rx.borrow();
                    if let Err(err) = events
                        .as_mut()
                        .send_status_update(last_write_lsn, watermark, watermark, true)
                        .await
                    {
                        report_error(&errors_tx, &err);
                        return Err(err);
                    }
                }
            }
            Tick::Message(Some(Ok(_))) => {
                // Protocol messages added after this was written; nothing to do.
            }
            Tick::Message(Some(Err(err))) => {
                report_error(&errors_tx, &err);
                return Err(err);
            }
            Tick::Message(None) => {
                let err = repl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "replication stream ended unexpectedly"
                );
                report_error(&errors_tx, &err);
                return Err(err);
            }
        }
    }
}

/// Mirrors a fatal consumer error onto the diagnostics channel.
///
/// The channel is best-effort only; the authoritative error travels through
/// the task's join handle.
fn report_error(errors_tx: &mpsc::Sender<ReplError>, err: &ReplError) {
    let diagnostic = repl_error!(err.kind(), "replication consumer failed", err);
    let _ = errors_tx.try_send(diagnostic);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_advances_monotonically() {
        let (handle, rx) = WatermarkHandle::new(Lsn::from_raw(100));

        assert!(handle.advance(Lsn::from_raw(200)));
        assert_eq!(*rx.borrow(), Lsn::from_raw(200));

        // Stale and equal values never move the watermark backwards.
        assert!(!handle.advance(Lsn::from_raw(150)));
        assert!(!handle.advance(Lsn::from_raw(200)));
        assert_eq!(*rx.borrow(), Lsn::from_raw(200));

        assert!(handle.advance(Lsn::from_raw(201)));
        assert_eq!(handle.current(), Lsn::from_raw(201));
    }
}
