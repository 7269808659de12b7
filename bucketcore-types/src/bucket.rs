//! Identifiers for endpoints, consumer instances and buckets.
//!
//! A deployment partitions the stream-identifier space into a fixed number of
//! buckets. Every instance of an endpoint competes for ownership of those
//! buckets; the ownership store is keyed by `(endpoint, bucket)`.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical endpoint name shared by every competing instance.
///
/// Uses nutype validation ensuring all endpoint names are:
/// - Non-empty (trimmed strings with at least 1 character)
/// - Within reasonable length (max 255 characters)
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EndpointName(String);

/// Identity of one running consumer instance.
///
/// The ownership store records a `ConsumerId` as the current owner of a
/// bucket. Two processes of the same endpoint must never share one.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ConsumerId(String);

impl ConsumerId {
    /// Generates a fresh, time-ordered consumer id.
    pub fn generate() -> Self {
        Self::try_new(Uuid::now_v7().to_string()).expect("a uuid string is never empty")
    }
}

/// Index of a bucket, always in `[0, bucket_count)` when produced by assignment.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct BucketId(u32);

/// Total number of buckets in a deployment (default 40).
///
/// Fixed for the lifetime of a deployment: changing it re-maps every stream
/// and invalidates all recorded ownership.
#[nutype(
    validate(greater_or_equal = 1),
    default = 40,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BucketCount(u32);

impl BucketCount {
    /// Every bucket id of the deployment, in ascending order.
    pub fn buckets(self) -> impl Iterator<Item = BucketId> {
        (0..self.into_inner()).map(BucketId::new)
    }
}

/// Key of an ownership record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// Endpoint the bucket belongs to.
    pub endpoint: EndpointName,
    /// Bucket index.
    pub bucket: BucketId,
}

impl BucketKey {
    /// Creates a key for `bucket` of `endpoint`.
    pub fn new(endpoint: EndpointName, bucket: BucketId) -> Self {
        Self { endpoint, bucket }
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.bucket)
    }
}
