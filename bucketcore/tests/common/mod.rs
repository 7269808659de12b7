//! Shared fixtures for subscriber integration tests.
//!
//! Durations are scaled down so lease expiry and adoption happen within a
//! test run.

use std::time::Duration;

use bucketcore::{
    BucketAssigner, BucketCount, BucketId, BucketsHandled, CompetingConfig, CompetingConfigBuilder,
    EndpointName, LogPosition, NewEntry, StreamId, SubscriberHandle, SubscriberStatus,
};
use bucketcore_memory::InMemoryEventLog;
use bucketcore_testing::eventually;
use uuid::Uuid;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

/// Heartbeat period used when leases must stay alive for the whole test.
pub const STEADY_HEARTBEAT: Duration = Duration::from_millis(100);
pub const STEADY_EXPIRATION: Duration = Duration::from_secs(5);

/// Heartbeat period used when a lease is expected to lapse.
pub const FAST_HEARTBEAT: Duration = Duration::from_millis(50);
pub const FAST_EXPIRATION: Duration = Duration::from_millis(300);

pub fn endpoint(label: &str) -> EndpointName {
    EndpointName::try_new(format!("{label}-{}", Uuid::now_v7())).expect("valid endpoint")
}

pub fn count(buckets: u32) -> BucketCount {
    BucketCount::try_new(buckets).expect("valid bucket count")
}

pub fn handled(buckets: u32) -> BucketsHandled {
    BucketsHandled::try_new(buckets).expect("valid buckets handled")
}

/// Leases that never lapse while the instance is running.
pub fn steady_config(endpoint: &EndpointName, buckets: u32, limit: u32) -> CompetingConfigBuilder {
    CompetingConfig::builder(endpoint.clone())
        .with_bucket_count(count(buckets))
        .with_buckets_handled(handled(limit))
        .with_heartbeat_interval(STEADY_HEARTBEAT)
        .with_expiration(STEADY_EXPIRATION)
}

/// Leases that lapse a few hundred milliseconds after their owner stops.
pub fn fast_config(endpoint: &EndpointName, buckets: u32, limit: u32) -> CompetingConfigBuilder {
    CompetingConfig::builder(endpoint.clone())
        .with_bucket_count(count(buckets))
        .with_buckets_handled(handled(limit))
        .with_heartbeat_interval(FAST_HEARTBEAT)
        .with_expiration(FAST_EXPIRATION)
}

/// The `nth` stream id of the form `order-<i>` assigned to `bucket`.
pub fn stream_in_bucket(buckets: u32, bucket: u32, nth: usize) -> StreamId {
    let assigner = BucketAssigner::new(count(buckets));
    (0..)
        .map(|i| StreamId::try_new(format!("order-{i}")).expect("valid stream id"))
        .filter(|stream| assigner.assign(stream) == BucketId::new(bucket))
        .nth(nth)
        .expect("the id space covers every bucket")
}

pub fn order_event(stream: &StreamId, n: u64) -> NewEntry {
    NewEntry::json(stream.clone(), "OrderPlaced", &serde_json::json!({ "n": n }))
        .expect("json payload encodes")
}

/// Append one event to each stream, in order.
pub fn append_round(log: &InMemoryEventLog, streams: &[StreamId], n: u64) -> Vec<LogPosition> {
    log.append_all(streams.iter().map(|stream| order_event(stream, n)))
}

/// Poll the subscriber's status until `predicate` holds.
pub async fn wait_for_status(
    handle: &SubscriberHandle,
    predicate: impl Fn(&SubscriberStatus) -> bool,
) -> SubscriberStatus {
    let predicate = &predicate;
    let met = eventually(WAIT, move || async move {
        handle
            .status()
            .await
            .map(|status| predicate(&status))
            .unwrap_or(false)
    })
    .await;
    assert!(met, "subscriber never reached the expected status");
    handle.status().await.expect("subscriber is running")
}

pub async fn wait_until_live(handle: &SubscriberHandle) {
    let _ = wait_for_status(handle, |status| status.live).await;
}

pub fn buckets(ids: &[u32]) -> Vec<BucketId> {
    ids.iter().copied().map(BucketId::new).collect()
}
