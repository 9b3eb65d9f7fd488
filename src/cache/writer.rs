//! Write-behind queue.
//!
//! One task per namespace applies durable operations in the order they were
//! issued, so a delete never lands before the put it follows. Callers that
//! need durability await the per-op acknowledgement; everyone else fires and
//! forgets.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::durable::DurableTier;
use super::tiered::MemoryTier;
use super::{CacheEntry, CacheStats};
use crate::error::StorageError;

type Ack = oneshot::Sender<Result<usize, StorageError>>;
pub(crate) type AckReceiver = oneshot::Receiver<Result<usize, StorageError>>;

enum WriteOp {
    Put {
        entry: CacheEntry,
        ack: Option<Ack>,
    },
    Remove {
        key: String,
        tombstone: Option<u64>,
        ack: Option<Ack>,
    },
    Clear {
        ack: Ack,
    },
    Barrier {
        ack: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteQueue {
    /// Spawns the queue task. Must be called from within a Tokio runtime.
    ///
    /// The task exits once every `WriteQueue` handle is dropped.
    pub(crate) fn spawn(
        namespace: String,
        durable: Arc<DurableTier>,
        memory: Arc<MemoryTier>,
        stats: Arc<CacheStats>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, namespace, durable, memory, stats));
        Self { tx }
    }

    pub(crate) fn put(&self, entry: CacheEntry, acked: bool) -> Option<AckReceiver> {
        let (ack, rx) = ack_pair(acked);
        self.send(WriteOp::Put { entry, ack });
        rx
    }

    /// Queues a durable delete. With `tombstone`, the matching memory
    /// tombstone is lifted once the delete has been applied.
    pub(crate) fn remove(
        &self,
        key: &str,
        tombstone: Option<u64>,
        acked: bool,
    ) -> Option<AckReceiver> {
        let (ack, rx) = ack_pair(acked);
        self.send(WriteOp::Remove {
            key: key.to_string(),
            tombstone,
            ack,
        });
        rx
    }

    pub(crate) fn clear(&self) -> AckReceiver {
        let (ack, rx) = oneshot::channel();
        self.send(WriteOp::Clear { ack });
        rx
    }

    /// Waits until every operation queued before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (ack, rx) = oneshot::channel();
        self.send(WriteOp::Barrier { ack });
        let _ = rx.await;
    }

    fn send(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            warn!("Write-behind queue closed; durable write dropped");
        }
    }
}

/// Resolves an acknowledgement, treating a vanished queue as a storage failure.
pub(crate) async fn settle(rx: AckReceiver) -> Result<usize, StorageError> {
    rx.await
        .unwrap_or_else(|_| Err(StorageError::Offline("write-behind queue closed".to_string())))
}

fn ack_pair(acked: bool) -> (Option<Ack>, Option<AckReceiver>) {
    if acked {
        let (tx, rx) = oneshot::channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    namespace: String,
    durable: Arc<DurableTier>,
    memory: Arc<MemoryTier>,
    stats: Arc<CacheStats>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Put { entry, ack } => {
                let result = durable.write(&entry).await.map(|_| 1);
                report(&namespace, &stats, "put", &entry.key, &result);
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            WriteOp::Remove {
                key,
                tombstone,
                ack,
            } => {
                let result = durable.remove(&key).await.map(|_| 1);
                // On failure the tombstone stays and keeps masking the stale
                // durable copy until a sweep rewrites the namespace.
                if let (Ok(_), Some(seq)) = (&result, tombstone) {
                    memory.remove_if(&key, |_, slot| slot.is_tombstone(seq));
                }
                report(&namespace, &stats, "remove", &key, &result);
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            WriteOp::Clear { ack } => {
                let result = durable.clear().await;
                report(&namespace, &stats, "clear", "*", &result);
                let _ = ack.send(result);
            }
            WriteOp::Barrier { ack } => {
                let _ = ack.send(());
            }
        }
    }
    debug!(namespace = %namespace, "Write-behind queue closed");
}

fn report(
    namespace: &str,
    stats: &CacheStats,
    op: &str,
    key: &str,
    result: &Result<usize, StorageError>,
) {
    match result {
        Ok(_) => debug!(namespace = %namespace, key = %key, op, "Durable write applied"),
        Err(e) => {
            stats.record_storage_error();
            warn!(
                namespace = %namespace,
                key = %key,
                op,
                error = %e,
                "Durable write failed, entry kept in memory only"
            );
        }
    }
}
