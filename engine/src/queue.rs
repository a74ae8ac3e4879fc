//! Outbound actions waiting for connectivity.
//!
//! Items are immutable once queued and leave the queue only after the
//! remote side has accepted them. Replay happens strictly in the order the
//! items were queued.

use crate::clock::IdGenerator;
use crate::collections::RecordCollection;
use crate::record::SyncQueueItem;
use crate::{error::Result, LocalStore, RecordKey, SYNC_QUEUE};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;

/// Sends one queued action to the remote API.
#[async_trait]
pub trait ActionReplayer: Send + Sync {
    type Error: Display + Send;

    async fn replay(&self, item: &SyncQueueItem) -> std::result::Result<(), Self::Error>;
}

/// The item that stopped a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedReplay {
    pub id: RecordKey,
    pub error: String,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Items replayed and removed
    pub replayed: usize,
    pub failed: Option<FailedReplay>,
    /// Items still queued, the failed one included
    pub remaining: usize,
}

#[derive(Clone)]
pub struct SyncQueue {
    items: RecordCollection<SyncQueueItem>,
    ids: Arc<IdGenerator>,
}

impl SyncQueue {
    pub fn new(store: LocalStore, ids: Arc<IdGenerator>) -> Self {
        Self {
            items: RecordCollection::new(store, SYNC_QUEUE),
            ids,
        }
    }

    /// Queue `action` behind everything already queued.
    pub async fn enqueue(&self, action: Value) -> Result<RecordKey> {
        let minted = self.ids.next();
        let item = SyncQueueItem {
            id: minted.id,
            timestamp: minted.timestamp,
            action,
        };
        self.items.put(&item.id, &item).await?;
        tracing::debug!(id = %item.id, "action queued for sync");
        Ok(item.id)
    }

    /// Queued items in insertion order.
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let mut items = self.items.list().await?;
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.items.delete(id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.items.clear().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.items.count().await
    }

    /// Replay queued items in order, removing each one the replayer accepts.
    ///
    /// Stops at the first rejected item; it and everything after it stay
    /// queued for the next drain. Store errors abort the drain.
    pub async fn drain<R>(&self, replayer: &R) -> Result<DrainReport>
    where
        R: ActionReplayer + ?Sized,
    {
        let items = self.list().await?;
        let total = items.len();
        let mut report = DrainReport::default();

        for item in &items {
            match replayer.replay(item).await {
                Ok(()) => {
                    self.remove(&item.id).await?;
                    report.replayed += 1;
                }
                Err(err) => {
                    tracing::warn!(id = %item.id, error = %err, "replay failed; leaving item queued");
                    report.failed = Some(FailedReplay {
                        id: item.id.clone(),
                        error: err.to_string(),
                    });
                    break;
                }
            }
        }

        report.remaining = total - report.replayed;
        tracing::info!(
            replayed = report.replayed,
            remaining = report.remaining,
            "sync queue drained"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;
    use crate::SchemaCatalog;
    use parking_lot::Mutex;
    use serde_json::json;

    fn queue() -> SyncQueue {
        let store = LocalStore::new(MemoryEngine::new(), SchemaCatalog::flora());
        SyncQueue::new(store, Arc::new(IdGenerator::new()))
    }

    /// Records what it sees and rejects actions whose `op` is `"reject"`.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ActionReplayer for Recorder {
        type Error = String;

        async fn replay(&self, item: &SyncQueueItem) -> std::result::Result<(), String> {
            self.seen.lock().push(item.action.clone());
            if item.action["op"] == "reject" {
                Err("server said no".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn items_list_in_insertion_order() {
        let queue = queue();
        let x = queue.enqueue(json!({"op": "x"})).await.unwrap();
        let y = queue.enqueue(json!({"op": "y"})).await.unwrap();
        let z = queue.enqueue(json!({"op": "z"})).await.unwrap();

        let ids: Vec<_> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![x.clone(), y.clone(), z.clone()]);

        queue.remove(&y).await.unwrap();
        let ids: Vec<_> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![x, z]);
        assert_eq!(queue.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drain_replays_everything_in_order() {
        let queue = queue();
        for op in ["a", "b", "c"] {
            queue.enqueue(json!({ "op": op })).await.unwrap();
        }
        let replayer = Recorder::default();

        let report = queue.drain(&replayer).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                replayed: 3,
                failed: None,
                remaining: 0
            }
        );
        let ops: Vec<_> = replayer.seen.lock().iter().map(|a| a["op"].clone()).collect();
        assert_eq!(ops, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drain_stops_at_first_failure() {
        let queue = queue();
        queue.enqueue(json!({"op": "a"})).await.unwrap();
        let rejected = queue.enqueue(json!({"op": "reject"})).await.unwrap();
        queue.enqueue(json!({"op": "c"})).await.unwrap();
        let replayer = Recorder::default();

        let report = queue.drain(&replayer).await.unwrap();

        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 2);
        assert_eq!(
            report.failed,
            Some(FailedReplay {
                id: rejected.clone(),
                error: "server said no".into()
            })
        );
        // "c" was never attempted.
        assert_eq!(replayer.seen.lock().len(), 2);
        assert_eq!(queue.list().await.unwrap()[0].id, rejected);
    }

    #[tokio::test]
    async fn draining_an_empty_queue() {
        let report = queue().drain(&Recorder::default()).await.unwrap();
        assert_eq!(report, DrainReport::default());
    }
}
