//! In-process durable record store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use roomkeeper_protocol::{RoomId, RoomRecord, decode_record, encode_record};
use serde_json::Value;

use crate::fault::FaultPlan;
use crate::{FaultKind, RecordStore, StoreError, StoreOp};

/// A document store holding room records as JSON documents.
///
/// Counts how many deletes actually removed a document, so tests can
/// assert that concurrent deletions had exactly one effect.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    documents: Arc<Mutex<HashMap<RoomId, Value>>>,
    deletions: Arc<AtomicUsize>,
    faults: Arc<FaultPlan>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deletes that removed an existing document.
    pub fn deletion_count(&self) -> usize {
        self.deletions.load(Ordering::SeqCst)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Makes the next `op` fail with `kind`.
    pub fn fail_next(&self, op: StoreOp, kind: FaultKind) {
        self.faults.fail_next(op, kind);
    }

    /// Makes every `op` fail with `kind` until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, op: StoreOp, kind: FaultKind) {
        self.faults.fail_always(op, kind);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RoomId, Value>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(&self, op: StoreOp) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.faults.check(op)
    }
}

impl RecordStore for MemoryRecordStore {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, StoreError> {
        self.begin(StoreOp::Read).await?;
        let document = self.lock().get(room_id).cloned();
        match document {
            Some(value) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: RoomRecord) -> Result<(), StoreError> {
        self.begin(StoreOp::Put).await?;
        let value = encode_record(&record)?;
        self.lock().insert(record.room_id, value);
        Ok(())
    }

    async fn delete(&self, room_id: &RoomId) -> Result<(), StoreError> {
        self.begin(StoreOp::Delete).await?;
        if self.lock().remove(room_id).is_none() {
            return Err(StoreError::NotFound(format!("room record {room_id}")));
        }
        self.deletions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RoomRecord {
        RoomRecord::new(RoomId::new(id).unwrap(), "Room", 1)
    }

    #[tokio::test]
    async fn test_put_get_exists() {
        let store = MemoryRecordStore::new();
        let r1 = record("r1");

        store.put(r1.clone()).await.unwrap();

        assert_eq!(store.get(&r1.room_id).await.unwrap(), Some(r1.clone()));
        assert!(store.exists(&r1.room_id).await.unwrap());
        assert!(!store.exists(&RoomId::new("r2").unwrap()).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_returns_not_found() {
        let store = MemoryRecordStore::new();
        let result = store.delete(&RoomId::new("r1").unwrap()).await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
        assert_eq!(store.deletion_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_counts_effects() {
        let store = MemoryRecordStore::new();
        let r1 = record("r1");
        store.put(r1.clone()).await.unwrap();

        store.delete(&r1.room_id).await.unwrap();
        let _ = store.delete(&r1.room_id).await;

        assert_eq!(store.deletion_count(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_delete_failure_keeps_record() {
        let store = MemoryRecordStore::new();
        let r1 = record("r1");
        store.put(r1.clone()).await.unwrap();
        store.fail_next(StoreOp::Delete, FaultKind::PermissionDenied);

        let result = store.delete(&r1.room_id).await;

        assert!(matches!(result, Err(StoreError::PermissionDenied { .. })));
        assert!(store.exists(&r1.room_id).await.unwrap());
    }
}
