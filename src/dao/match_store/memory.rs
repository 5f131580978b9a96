//! In-process match store used for single-daemon play and for tests.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::dao::{
    match_store::{MatchStore, SnapshotStream, generate_id},
    models::{Document, FieldMap, WriteOutcome, merge_fields, preconditions_hold},
    storage::{StorageError, StorageResult},
};

const WATCH_CAPACITY: usize = 64;

#[derive(Debug, Error)]
#[error("injected write failure")]
struct InjectedFailure;

/// A document together with the channel fanning its snapshots out to watchers.
///
/// Both live under the same map entry so a write and its notification happen
/// under one lock and watchers never observe snapshots out of order.
struct Slot {
    document: Option<Document>,
    tx: broadcast::Sender<Document>,
}

impl Slot {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(WATCH_CAPACITY);
        Self { document: None, tx }
    }
}

#[derive(Default)]
struct MemoryInner {
    slots: DashMap<String, Slot>,
    failing_writes: AtomicU32,
    applied_writes: AtomicU64,
}

impl MemoryInner {
    fn take_injected_failure(&self, key: &str) -> StorageResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::unavailable(
                format!("write to `{key}` rejected"),
                InjectedFailure,
            ));
        }
        Ok(())
    }
}

/// Match store keeping every document in memory, shared by cloning.
#[derive(Clone, Default)]
pub struct MemoryMatchStore {
    inner: Arc<MemoryInner>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with [`StorageError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of writes (guarded or not) that changed a document so far.
    pub fn applied_writes(&self) -> u64 {
        self.inner.applied_writes.load(Ordering::SeqCst)
    }

    /// Drop every watch subscription of a document, as a lost connection would.
    pub fn drop_watchers(&self, namespace: &str, id: &str) {
        if let Some(mut slot) = self.inner.slots.get_mut(&slot_key(namespace, id)) {
            let (tx, _rx) = broadcast::channel(WATCH_CAPACITY);
            slot.tx = tx;
        }
    }
}

fn slot_key(namespace: &str, id: &str) -> String {
    format!("{namespace}::{id}")
}

impl MatchStore for MemoryMatchStore {
    fn create(&self, _namespace: &str) -> BoxFuture<'static, StorageResult<String>> {
        Box::pin(async move { Ok(generate_id()) })
    }

    fn write_fields(
        &self,
        namespace: &str,
        id: &str,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        let key = slot_key(namespace, id);
        Box::pin(async move {
            inner.take_injected_failure(&key)?;
            let mut slot = inner.slots.entry(key).or_insert_with(Slot::new);
            let snapshot = {
                let document = slot.document.get_or_insert_with(Document::new);
                merge_fields(document, fields);
                document.clone()
            };
            let _ = slot.tx.send(snapshot);
            inner.applied_writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn write_fields_if(
        &self,
        namespace: &str,
        id: &str,
        expected: FieldMap,
        fields: FieldMap,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let inner = self.inner.clone();
        let key = slot_key(namespace, id);
        Box::pin(async move {
            inner.take_injected_failure(&key)?;
            let Some(mut slot) = inner.slots.get_mut(&key) else {
                return Ok(WriteOutcome::PreconditionFailed);
            };
            let snapshot = {
                let Some(document) = slot.document.as_mut() else {
                    return Ok(WriteOutcome::PreconditionFailed);
                };
                if !preconditions_hold(document, &expected) {
                    return Ok(WriteOutcome::PreconditionFailed);
                }
                merge_fields(document, fields);
                document.clone()
            };
            let _ = slot.tx.send(snapshot);
            inner.applied_writes.fetch_add(1, Ordering::SeqCst);
            Ok(WriteOutcome::Applied)
        })
    }

    fn read_once(
        &self,
        namespace: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let inner = self.inner.clone();
        let key = slot_key(namespace, id);
        Box::pin(async move {
            Ok(inner
                .slots
                .get(&key)
                .and_then(|slot| slot.document.clone()))
        })
    }

    fn watch(&self, namespace: &str, id: &str) -> BoxFuture<'static, StorageResult<SnapshotStream>> {
        let inner = self.inner.clone();
        let key = slot_key(namespace, id);
        Box::pin(async move {
            let (initial, mut rx) = {
                let slot = inner.slots.entry(key.clone()).or_insert_with(Slot::new);
                (slot.document.clone(), slot.tx.subscribe())
            };

            let stream = async_stream::stream! {
                if let Some(document) = initial {
                    yield Ok(document);
                }
                loop {
                    match rx.recv().await {
                        Ok(document) => yield Ok(document),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(key = %key, skipped, "memory watcher lagged; resending latest snapshot");
                            let latest = inner.slots.get(&key).and_then(|slot| slot.document.clone());
                            if let Some(document) = latest {
                                yield Ok(document);
                            }
                        }
                        Err(RecvError::Closed) => {
                            yield Err(StorageError::disconnected(format!("watchers of `{key}` dropped")));
                            break;
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as SnapshotStream)
        })
    }

    fn list(
        &self,
        namespace: &str,
        filter: FieldMap,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let inner = self.inner.clone();
        let prefix = slot_key(namespace, "");
        Box::pin(async move {
            Ok(inner
                .slots
                .iter()
                .filter(|entry| entry.key().starts_with(&prefix))
                .filter_map(|entry| entry.value().document.clone())
                .filter(|document| preconditions_hold(document, &filter))
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::{Value, json};

    use super::*;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watch_emits_current_document_then_updates() {
        let store = MemoryMatchStore::new();
        store
            .write_fields("match", "m1", fields(json!({ "state": "waiting" })))
            .await
            .unwrap();

        let mut stream = store.watch("match", "m1").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first["state"], json!("waiting"));

        store
            .write_fields("match", "m1", fields(json!({ "state": "in_progress" })))
            .await
            .unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second["state"], json!("in_progress"));
    }

    #[tokio::test]
    async fn guarded_write_checks_preconditions_and_never_creates() {
        let store = MemoryMatchStore::new();
        let outcome = store
            .write_fields_if("match", "ghost", FieldMap::new(), fields(json!({ "a": 1 })))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::PreconditionFailed);
        assert!(store.read_once("match", "ghost").await.unwrap().is_none());

        store
            .write_fields("match", "m1", fields(json!({ "joiner_id": null })))
            .await
            .unwrap();
        let expected = fields(json!({ "joiner_id": null }));
        let first = store
            .write_fields_if("match", "m1", expected.clone(), fields(json!({ "joiner_id": "j1" })))
            .await
            .unwrap();
        let second = store
            .write_fields_if("match", "m1", expected, fields(json!({ "joiner_id": "j2" })))
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Applied);
        assert_eq!(second, WriteOutcome::PreconditionFailed);

        let doc = store.read_once("match", "m1").await.unwrap().unwrap();
        assert_eq!(doc["joiner_id"], json!("j1"));
        assert_eq!(store.applied_writes(), 2);
    }

    #[tokio::test]
    async fn dropped_watchers_see_a_disconnect() {
        let store = MemoryMatchStore::new();
        store
            .write_fields("match", "m1", fields(json!({ "state": "waiting" })))
            .await
            .unwrap();
        let mut stream = store.watch("match", "m1").await.unwrap();
        let _ = stream.next().await;

        store.drop_watchers("match", "m1");

        assert!(matches!(
            stream.next().await,
            Some(Err(StorageError::Disconnected { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_failures_reject_writes() {
        let store = MemoryMatchStore::new();
        store.fail_next_writes(1);
        assert!(
            store
                .write_fields("match", "m1", fields(json!({ "a": 1 })))
                .await
                .is_err()
        );
        assert!(
            store
                .write_fields("match", "m1", fields(json!({ "a": 1 })))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_fields() {
        let store = MemoryMatchStore::new();
        store
            .write_fields("match", "m1", fields(json!({ "state": "waiting" })))
            .await
            .unwrap();
        store
            .write_fields("match", "m2", fields(json!({ "state": "finished" })))
            .await
            .unwrap();
        store
            .write_fields("profile", "p1", fields(json!({ "state": "waiting" })))
            .await
            .unwrap();

        let open = store
            .list("match", fields(json!({ "state": "waiting" })))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
    }
}
