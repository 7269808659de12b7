//! Bucket partitioning across competing instances.
//!
//! Every instance sees every event; an event is dispatched only by the
//! instance that owns its bucket, and every bucket has at most one owner.

mod common;

use std::collections::BTreeSet;

use bucketcore::{CompetingSubscriber, ConsumerId, LogPosition};
use bucketcore_memory::{InMemoryEventLog, InMemoryOwnershipStore};
use bucketcore_testing::{eventually, RecordingDispatcher};

use common::{
    append_round, buckets, endpoint, steady_config, stream_in_bucket, wait_for_status,
    wait_until_live, WAIT,
};

fn consumer(label: &str) -> ConsumerId {
    ConsumerId::try_new(label).expect("valid consumer id")
}

#[tokio::test(flavor = "multi_thread")]
async fn single_instance_claims_and_dispatches_up_to_its_limit() {
    // Given: a log with two events in each of four buckets
    let endpoint = endpoint("single");
    let log = InMemoryEventLog::new();
    let store = InMemoryOwnershipStore::new();
    let streams: Vec<_> = (0..4).map(|bucket| stream_in_bucket(4, bucket, 0)).collect();
    let mut positions = append_round(&log, &streams, 0);
    positions.extend(append_round(&log, &streams, 1));

    // When: one instance allowed all four buckets subscribes
    let dispatcher = RecordingDispatcher::new();
    let config = steady_config(&endpoint, 4, 4).build().expect("valid config");
    let subscriber =
        CompetingSubscriber::new(config, store.clone(), log.clone(), dispatcher.clone())
            .await
            .with_consumer_id(consumer("instance-a"));
    let handle = subscriber.subscribe_to_all();

    // Then: it claims every bucket and dispatches every event exactly once, in log order
    let status = wait_for_status(&handle, |status| status.live).await;
    assert_eq!(status.claimed, buckets(&[0, 1, 2, 3]));
    assert_eq!(dispatcher.positions(), positions);

    // And: the store names it as the owner of every bucket
    let records = store.records();
    assert_eq!(records.len(), 4);
    assert!(records
        .values()
        .all(|record| record.owner == consumer("instance-a")));

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn instance_at_its_limit_skips_remaining_buckets() {
    // Given: events in four buckets and an instance allowed two
    let endpoint = endpoint("limit");
    let log = InMemoryEventLog::new();
    let streams: Vec<_> = (0..4).map(|bucket| stream_in_bucket(4, bucket, 0)).collect();
    let positions = append_round(&log, &streams, 0);

    let dispatcher = RecordingDispatcher::new();
    let config = steady_config(&endpoint, 4, 2).build().expect("valid config");
    let handle = CompetingSubscriber::new(
        config,
        InMemoryOwnershipStore::new(),
        log.clone(),
        dispatcher.clone(),
    )
    .await
    .subscribe_to_all();

    // Then: the first two buckets in log order are claimed and the rest skipped
    let status = wait_for_status(&handle, |status| status.live).await;
    assert_eq!(status.claimed, buckets(&[0, 1]));
    assert_eq!(dispatcher.positions(), positions[..2].to_vec());

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn two_instances_split_four_buckets_two_each() {
    // Given: four buckets, two instances each allowed two, sharing store and log
    let endpoint = endpoint("split");
    let log = InMemoryEventLog::new();
    let store = InMemoryOwnershipStore::new();
    let streams: Vec<_> = (0..4).map(|bucket| stream_in_bucket(4, bucket, 0)).collect();
    let history = append_round(&log, &streams, 0);

    let dispatcher_a = RecordingDispatcher::new();
    let dispatcher_b = RecordingDispatcher::new();
    let config = steady_config(&endpoint, 4, 2).build().expect("valid config");

    // When: A subscribes and settles, then B joins
    let handle_a = CompetingSubscriber::new(
        config.clone(),
        store.clone(),
        log.clone(),
        dispatcher_a.clone(),
    )
    .await
    .with_consumer_id(consumer("instance-a"))
    .subscribe_to_all();
    let status_a = wait_for_status(&handle_a, |status| status.live).await;
    assert_eq!(status_a.claimed.len(), 2);

    let handle_b =
        CompetingSubscriber::new(config, store.clone(), log.clone(), dispatcher_b.clone())
            .await
            .with_consumer_id(consumer("instance-b"))
            .subscribe_to_all();
    let status_b = wait_for_status(&handle_b, |status| status.live).await;

    // Then: the claims are disjoint and cover every bucket
    let claimed_a: BTreeSet<_> = status_a.claimed.iter().copied().collect();
    let claimed_b: BTreeSet<_> = status_b.claimed.iter().copied().collect();
    assert!(claimed_a.is_disjoint(&claimed_b));
    assert_eq!(claimed_a.len() + claimed_b.len(), 4);

    // And: live events are dispatched by their bucket's owner only
    let live = append_round(&log, &streams, 1);
    let all: BTreeSet<LogPosition> = history.iter().chain(&live).copied().collect();
    let covered = eventually(WAIT, || {
        let (a, b) = (dispatcher_a.clone(), dispatcher_b.clone());
        let all = all.clone();
        async move {
            let union: BTreeSet<_> = a
                .distinct_positions()
                .union(&b.distinct_positions())
                .copied()
                .collect();
            union == all
        }
    })
    .await;
    assert!(covered, "every event should reach exactly one owner");
    assert!(dispatcher_a
        .distinct_positions()
        .is_disjoint(&dispatcher_b.distinct_positions()));
    assert_eq!(dispatcher_a.dispatch_count() + dispatcher_b.dispatch_count(), 8);

    handle_a.shutdown().await.expect("clean shutdown");
    handle_b.shutdown().await.expect("clean shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn simultaneous_instances_never_share_a_bucket() {
    // Given: six buckets with history and three instances of two buckets each
    let endpoint = endpoint("race");
    let log = InMemoryEventLog::new();
    let store = InMemoryOwnershipStore::new();
    let streams: Vec<_> = (0..6).map(|bucket| stream_in_bucket(6, bucket, 0)).collect();
    for round in 0..3 {
        let _ = append_round(&log, &streams, round);
    }
    let config = steady_config(&endpoint, 6, 2).build().expect("valid config");

    // When: all three subscribe at once
    let mut instances = Vec::new();
    for index in 0..3 {
        let dispatcher = RecordingDispatcher::new();
        let handle = CompetingSubscriber::new(
            config.clone(),
            store.clone(),
            log.clone(),
            dispatcher.clone(),
        )
        .await
        .with_consumer_id(consumer(&format!("instance-{index}")))
        .subscribe_to_all();
        instances.push((handle, dispatcher));
    }
    for (handle, _) in &instances {
        wait_until_live(handle).await;
    }

    // Then: each bucket has exactly one owner, matching the store
    let mut owners = std::collections::BTreeMap::new();
    for (handle, _) in &instances {
        let status = handle.status().await.expect("running");
        for bucket in status.claimed {
            assert!(
                owners.insert(bucket, status.consumer_id.clone()).is_none(),
                "bucket {bucket} claimed by two instances"
            );
        }
    }
    for (key, record) in store.records() {
        if let Some(owner) = owners.get(&key.bucket) {
            assert_eq!(owner, &record.owner);
        }
    }

    // And: no event was dispatched twice across the fleet
    let mut seen = BTreeSet::new();
    for (_, dispatcher) in &instances {
        for position in dispatcher.positions() {
            assert!(seen.insert(position), "{position} dispatched twice");
        }
    }

    for (handle, _) in instances {
        handle.shutdown().await.expect("clean shutdown");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_entries_are_never_dispatched() {
    // Given: a binary entry and a null payload between two data-bearing events
    let endpoint = endpoint("decode");
    let log = InMemoryEventLog::new();
    let stream = stream_in_bucket(2, 0, 0);
    let first = log.append(common::order_event(&stream, 0));
    let _ = log.append(bucketcore::NewEntry::binary(
        stream.clone(),
        "Snapshot",
        vec![0xde, 0xad],
    ));
    let _ = log.append(
        bucketcore::NewEntry::json(stream.clone(), "Empty", &serde_json::Value::Null)
            .expect("null encodes"),
    );
    let last = log.append(common::order_event(&stream, 1));

    // When: an instance tails the log
    let dispatcher = RecordingDispatcher::new();
    let config = steady_config(&endpoint, 2, 2).build().expect("valid config");
    let handle = CompetingSubscriber::new(
        config,
        InMemoryOwnershipStore::new(),
        log,
        dispatcher.clone(),
    )
    .await
    .subscribe_to_all();
    wait_until_live(&handle).await;

    // Then: only the data-bearing events were dispatched
    assert_eq!(dispatcher.positions(), vec![first, last]);

    handle.shutdown().await.expect("clean shutdown");
}
