//! Ordered per-connection write queue
//!
//! Each registered connection gets one writer task draining a bounded
//! queue, so frames reach a peer in the order they were pushed while a
//! stalled peer only ever holds up its own queue.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{write_with_timeout, Connection, ConnectionError, SlotKey};

/// How outboxes are opened by one registry
#[derive(Clone)]
pub struct OutboxSettings {
    /// Frames that may wait before pushes fail with `Backlogged`
    pub capacity: usize,
    pub write_timeout: Duration,
    /// Receives the key of every outbox whose writer gave up
    pub failed: mpsc::UnboundedSender<SlotKey>,
}

impl OutboxSettings {
    pub fn open(&self, key: SlotKey, conn: Arc<dyn Connection>) -> Outbox {
        Outbox::spawn(key, conn, self)
    }
}

pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
    conn: Arc<dyn Connection>,
}

impl Outbox {
    /// Start the writer task for `conn`
    ///
    /// The writer stops at the first failed write and reports `key`; it also
    /// stops once the outbox is dropped and its queue is drained.
    pub fn spawn(key: SlotKey, conn: Arc<dyn Connection>, settings: &OutboxSettings) -> Self {
        let (tx, mut rx) = mpsc::channel::<Bytes>(settings.capacity.max(1));
        let writer = Arc::clone(&conn);
        let timeout = settings.write_timeout;
        let failed = settings.failed.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write_with_timeout(writer.as_ref(), frame, timeout).await {
                    tracing::debug!(peer = %writer.peer(), slot = %key, error = %e, "Queued write failed");
                    let _ = failed.send(key);
                    return;
                }
            }
        });

        Self { tx, conn }
    }

    /// Queue one frame behind everything pushed before it
    pub fn push(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backlogged,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    pub fn conn(&self) -> &Arc<dyn Connection> {
        &self.conn
    }
}
