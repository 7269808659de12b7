use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bucketcore_types::{
    BucketKey, ConsumerId, LogPosition, OwnershipOutcome, OwnershipRecord, OwnershipStore,
    OwnershipStoreError, Timestamp,
};
use parking_lot::Mutex;

/// Thread-safe in-memory ownership table.
///
/// Every operation runs under a single mutex, which makes claim and adopt
/// trivially atomic. Clones share the same table, so several subscribers
/// built from clones of one store compete exactly as separate processes
/// would against a shared database.
#[derive(Clone, Default)]
pub struct InMemoryOwnershipStore {
    records: Arc<Mutex<HashMap<BucketKey, OwnershipRecord>>>,
    // Total number of store calls served, for asserting quiescence in tests
    calls: Arc<AtomicU64>,
}

impl InMemoryOwnershipStore {
    /// Create a new empty ownership store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every record, keyed by bucket.
    pub fn records(&self) -> HashMap<BucketKey, OwnershipRecord> {
        self.records.lock().clone()
    }

    /// Overwrite the heartbeat of `key`, simulating an owner that stopped renewing.
    ///
    /// Returns `false` when the bucket has no record.
    pub fn set_last_heartbeat(&self, key: &BucketKey, heartbeat: Timestamp) -> bool {
        let mut records = self.records.lock();
        records.get_mut(key).is_some_and(|record| {
            record.last_heartbeat = heartbeat;
            true
        })
    }

    fn served(&self) {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OwnershipStore for InMemoryOwnershipStore {
    async fn check_or_save(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        position: LogPosition,
    ) -> OwnershipOutcome {
        self.served();
        let mut records = self.records.lock();

        match records.get_mut(key) {
            None => {
                let _ = records.insert(
                    key.clone(),
                    OwnershipRecord {
                        owner: owner.clone(),
                        last_heartbeat: Timestamp::now(),
                        last_position: Some(position),
                    },
                );
                OwnershipOutcome::Owned
            }
            Some(record) if &record.owner == owner => {
                record.last_heartbeat = Timestamp::now();
                record.last_position = Some(position);
                OwnershipOutcome::Owned
            }
            Some(_) => OwnershipOutcome::Conflict,
        }
    }

    async fn heartbeat(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        now: Timestamp,
        position: Option<LogPosition>,
    ) -> OwnershipOutcome {
        self.served();
        let mut records = self.records.lock();

        match records.get_mut(key) {
            Some(record) if &record.owner == owner => {
                record.last_heartbeat = now;
                if let Some(position) = position {
                    record.last_position = Some(position);
                }
                OwnershipOutcome::Owned
            }
            _ => OwnershipOutcome::Conflict,
        }
    }

    async fn adopt(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        observed_heartbeat: Timestamp,
        now: Timestamp,
    ) -> OwnershipOutcome {
        self.served();
        let mut records = self.records.lock();

        match records.get_mut(key) {
            Some(record) if record.last_heartbeat == observed_heartbeat => {
                record.owner = owner.clone();
                record.last_heartbeat = now;
                OwnershipOutcome::Owned
            }
            _ => OwnershipOutcome::Conflict,
        }
    }

    async fn last_heartbeat(
        &self,
        key: &BucketKey,
    ) -> Result<Option<Timestamp>, OwnershipStoreError> {
        self.served();
        Ok(self
            .records
            .lock()
            .get(key)
            .map(|record| record.last_heartbeat))
    }

    async fn last_position(
        &self,
        key: &BucketKey,
    ) -> Result<Option<LogPosition>, OwnershipStoreError> {
        self.served();
        Ok(self
            .records
            .lock()
            .get(key)
            .and_then(|record| record.last_position))
    }

    async fn record(
        &self,
        key: &BucketKey,
    ) -> Result<Option<OwnershipRecord>, OwnershipStoreError> {
        self.served();
        Ok(self.records.lock().get(key).cloned())
    }
}
