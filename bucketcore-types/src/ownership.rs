//! Durable bucket ownership: the only cross-instance coordination point.
//!
//! Every guarantee of "a single current owner per bucket" rests on the
//! atomicity of [`OwnershipStore::check_or_save`] and [`OwnershipStore::adopt`].
//! Claim, heartbeat and adopt report an explicit [`OwnershipOutcome`]; callers
//! branch on it instead of treating a lost bucket as an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bucket::{BucketKey, ConsumerId};
use crate::log::LogPosition;
use crate::time::Timestamp;

/// Identifies the ownership store operation that failed.
///
/// Used by `OwnershipOutcome::StoreUnavailable` and `OwnershipStoreError`
/// to tell which call encountered an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Claiming an unowned bucket.
    CheckOrSave,
    /// Renewing a lease.
    Heartbeat,
    /// Taking over an orphaned bucket.
    Adopt,
    /// Reading the last heartbeat.
    LastHeartbeat,
    /// Reading the last recorded position.
    LastPosition,
    /// Reading a whole record.
    ReadRecord,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckOrSave => write!(f, "check_or_save"),
            Self::Heartbeat => write!(f, "heartbeat"),
            Self::Adopt => write!(f, "adopt"),
            Self::LastHeartbeat => write!(f, "last_heartbeat"),
            Self::LastPosition => write!(f, "last_position"),
            Self::ReadRecord => write!(f, "read_record"),
        }
    }
}

/// Result of an ownership-changing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipOutcome {
    /// The caller owns the bucket after the call.
    Owned,
    /// Someone else owns the bucket (a failed claim, or ownership lost).
    Conflict,
    /// The store could not be reached; nothing is known about ownership.
    StoreUnavailable(Operation),
}

impl OwnershipOutcome {
    /// Whether the caller owns the bucket.
    pub const fn is_owned(self) -> bool {
        matches!(self, Self::Owned)
    }
}

/// Error type returned by ownership store queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipStoreError {
    /// Represents infrastructure failures surfaced by the backing store.
    #[error("{operation} operation failed: {detail}")]
    Unavailable {
        /// The failing operation.
        operation: Operation,
        /// Backend-specific description.
        detail: String,
    },
}

impl OwnershipStoreError {
    /// A failure of `operation`.
    pub fn unavailable(operation: Operation, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            detail: detail.into(),
        }
    }

    /// The operation that failed.
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Unavailable { operation, .. } => *operation,
        }
    }
}

/// The durable state kept for one `(endpoint, bucket)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Current owner.
    pub owner: ConsumerId,
    /// When the owner last renewed its lease.
    pub last_heartbeat: Timestamp,
    /// Last log position the owner reported as processed.
    pub last_position: Option<LogPosition>,
}

/// Durable, atomically updatable ownership table keyed by `(endpoint, bucket)`.
///
/// Implementations include:
/// - `bucketcore-memory`: mutex-guarded map for tests and single-process use
/// - `bucketcore-postgres`: conditional writes on a PostgreSQL table
#[async_trait]
pub trait OwnershipStore: Send + Sync {
    /// Claim `key` for `owner` if it is unowned or already owned by `owner`.
    ///
    /// A successful claim stamps the heartbeat with the current time and
    /// records `position`. Concurrent callers for one key: exactly one is `Owned`.
    async fn check_or_save(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        position: LogPosition,
    ) -> OwnershipOutcome;

    /// Renew the lease `owner` believes it holds on `key`.
    ///
    /// `position` is only overwritten when supplied; `None` is a liveness-only
    /// ping. Returns `Conflict` when `owner` no longer holds the record.
    async fn heartbeat(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        now: Timestamp,
        position: Option<LogPosition>,
    ) -> OwnershipOutcome;

    /// Transfer an orphaned `key` to `owner`.
    ///
    /// Compare-and-set on the heartbeat: succeeds only while the record still
    /// carries `observed_heartbeat`, the stale value the caller judged expired.
    /// Returns `Conflict` when another instance adopted first or the previous
    /// owner renewed in the meantime.
    async fn adopt(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        observed_heartbeat: Timestamp,
        now: Timestamp,
    ) -> OwnershipOutcome;

    /// When the current owner of `key` last renewed its lease.
    async fn last_heartbeat(&self, key: &BucketKey)
        -> Result<Option<Timestamp>, OwnershipStoreError>;

    /// Last position recorded for `key`.
    async fn last_position(
        &self,
        key: &BucketKey,
    ) -> Result<Option<LogPosition>, OwnershipStoreError>;

    /// The whole record for `key`.
    async fn record(&self, key: &BucketKey)
        -> Result<Option<OwnershipRecord>, OwnershipStoreError>;
}

/// Forwarding implementation so a shared store can be handed to several subscribers.
// cargo-mutants: skip (trivial forwarding impl)
#[async_trait]
impl<T: OwnershipStore + ?Sized> OwnershipStore for std::sync::Arc<T> {
    async fn check_or_save(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        position: LogPosition,
    ) -> OwnershipOutcome {
        (**self).check_or_save(key, owner, position).await
    }

    async fn heartbeat(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        now: Timestamp,
        position: Option<LogPosition>,
    ) -> OwnershipOutcome {
        (**self).heartbeat(key, owner, now, position).await
    }

    async fn adopt(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        observed_heartbeat: Timestamp,
        now: Timestamp,
    ) -> OwnershipOutcome {
        (**self).adopt(key, owner, observed_heartbeat, now).await
    }

    async fn last_heartbeat(
        &self,
        key: &BucketKey,
    ) -> Result<Option<Timestamp>, OwnershipStoreError> {
        (**self).last_heartbeat(key).await
    }

    async fn last_position(
        &self,
        key: &BucketKey,
    ) -> Result<Option<LogPosition>, OwnershipStoreError> {
        (**self).last_position(key).await
    }

    async fn record(
        &self,
        key: &BucketKey,
    ) -> Result<Option<OwnershipRecord>, OwnershipStoreError> {
        (**self).record(key).await
    }
}
