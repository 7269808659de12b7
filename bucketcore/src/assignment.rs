//! Deterministic mapping of streams to buckets.

use bucketcore_types::{BucketCount, BucketId, StreamId};

/// Maps stream identifiers onto `[0, bucket_count)`.
///
/// The hash is CRC-32 over the UTF-8 bytes of the stream id, so the mapping
/// is identical across processes, restarts and platforms. Distinct streams
/// may share a bucket; assignment only balances load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketAssigner {
    count: BucketCount,
}

impl BucketAssigner {
    /// An assigner for a deployment with `count` buckets.
    pub const fn new(count: BucketCount) -> Self {
        Self { count }
    }

    /// The bucket that owns `stream_id`.
    pub fn assign(&self, stream_id: &StreamId) -> BucketId {
        let hash = crc32fast::hash(stream_id.as_ref().as_bytes());
        BucketId::new(hash % self.count.into_inner())
    }

    /// Number of buckets in the deployment.
    pub const fn count(&self) -> BucketCount {
        self.count
    }
}
