//! Subscription drops, cancellation, shutdown and store trouble.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bucketcore::{CompetingSubscriber, DropReason, SubscriberError, SubscriberHandle};
use bucketcore_memory::{InMemoryEventLog, InMemoryOwnershipStore};
use bucketcore_testing::{eventually, ChaosConfig, ChaosOwnershipStoreExt, RecordingDispatcher};
use parking_lot::Mutex;

use common::{
    append_round, buckets, endpoint, fast_config, steady_config, stream_in_bucket,
    wait_for_status, wait_until_live, WAIT,
};

type Drops = Arc<Mutex<Vec<(DropReason, Option<String>)>>>;

fn drop_recorder() -> (Drops, impl Fn(&DropReason, Option<&str>) + Send + Sync + 'static) {
    let drops = Drops::default();
    let sink = Arc::clone(&drops);
    let callback = move |reason: &DropReason, fault: Option<&str>| {
        sink.lock().push((reason.clone(), fault.map(str::to_owned)));
    };
    (drops, callback)
}

async fn wait_until_finished(handle: &SubscriberHandle) {
    let finished = eventually(WAIT, move || async move { handle.is_finished() }).await;
    assert!(finished, "subscription should have ended");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_drop_reports_the_fault_and_a_new_subscription_starts_clean() {
    // Given: a live instance owning its only bucket
    let endpoint = endpoint("drop");
    let log = InMemoryEventLog::new();
    let streams = vec![stream_in_bucket(1, 0, 0)];
    let history = append_round(&log, &streams, 0);
    let (drops, callback) = drop_recorder();

    let dispatcher = RecordingDispatcher::new();
    let subscriber = CompetingSubscriber::new(
        steady_config(&endpoint, 1, 1).build().expect("valid config"),
        InMemoryOwnershipStore::new(),
        log.clone(),
        dispatcher.clone(),
    )
    .await
    .on_dropped(callback);
    let handle = subscriber.subscribe_to_all();
    let _ = wait_for_status(&handle, |status| status.claimed == buckets(&[0]) && status.live).await;

    // When: the log severs the subscription with a server error
    log.sever_subscriptions(DropReason::ServerError("boom".to_owned()));

    // Then: the subscription ends with the drop and the callback sees the fault
    wait_until_finished(&handle).await;
    assert!(!handle.is_live());
    assert_eq!(
        handle.wait().await,
        Err(SubscriberError::Dropped(DropReason::ServerError(
            "boom".to_owned()
        )))
    );
    assert_eq!(
        *drops.lock(),
        vec![(
            DropReason::ServerError("boom".to_owned()),
            Some("boom".to_owned())
        )]
    );

    // When: the application subscribes again
    let handle = subscriber.subscribe_to_all();

    // Then: it reclaims its bucket and replays from the start
    let status = wait_for_status(&handle, |status| status.live).await;
    assert_eq!(status.claimed, buckets(&[0]));
    assert_eq!(dispatcher.positions(), [history.clone(), history].concat());
    assert_eq!(log.subscriptions_opened(), 2);

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn requested_drop_ends_quietly() {
    // Given: a live instance with a drop callback
    let endpoint = endpoint("quiet");
    let log = InMemoryEventLog::new();
    let (drops, callback) = drop_recorder();
    let handle = CompetingSubscriber::new(
        steady_config(&endpoint, 2, 2).build().expect("valid config"),
        InMemoryOwnershipStore::new(),
        log.clone(),
        RecordingDispatcher::new(),
    )
    .await
    .on_dropped(callback)
    .subscribe_to_all();
    wait_until_live(&handle).await;

    // When: the subscription ends at the subscriber's own request
    log.sever_subscriptions(DropReason::UserInitiated);

    // Then: it ends cleanly without calling back
    assert_eq!(handle.wait().await, Ok(()));
    assert!(drops.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_dispatch_drops_the_subscription_as_a_handler_fault() {
    // Given: a dispatcher that fails on the second event
    let endpoint = endpoint("fault");
    let log = InMemoryEventLog::new();
    let streams = vec![stream_in_bucket(1, 0, 0)];
    let mut history = append_round(&log, &streams, 0);
    history.extend(append_round(&log, &streams, 1));
    let dispatcher = RecordingDispatcher::new();
    dispatcher.fail_at(history[1]);
    let (drops, callback) = drop_recorder();

    // When: the instance processes the history
    let handle = CompetingSubscriber::new(
        steady_config(&endpoint, 1, 1).build().expect("valid config"),
        InMemoryOwnershipStore::new(),
        log,
        dispatcher.clone(),
    )
    .await
    .on_dropped(callback)
    .subscribe_to_all();

    // Then: it stops at the failing event with a handler fault
    let result = handle.wait().await;
    assert!(
        matches!(&result, Err(SubscriberError::Dropped(DropReason::HandlerFault(detail))) if detail.contains("injected failure")),
        "unexpected result {result:?}"
    );
    assert_eq!(dispatcher.positions(), history[..2].to_vec());

    let drops = drops.lock();
    assert_eq!(drops.len(), 1);
    assert!(matches!(drops[0].0, DropReason::HandlerFault(_)));
    assert!(drops[0].1.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_without_a_drop_callback() {
    // Given: a dispatcher that cancels on the first event
    let endpoint = endpoint("cancel");
    let log = InMemoryEventLog::new();
    let streams = vec![stream_in_bucket(1, 0, 0)];
    let history = append_round(&log, &streams, 0);
    let dispatcher = RecordingDispatcher::new();
    dispatcher.cancel_at(history[0]);
    let (drops, callback) = drop_recorder();

    let handle = CompetingSubscriber::new(
        steady_config(&endpoint, 1, 1).build().expect("valid config"),
        InMemoryOwnershipStore::new(),
        log,
        dispatcher,
    )
    .await
    .on_dropped(callback)
    .subscribe_to_all();

    // When: the subscription winds down
    wait_until_finished(&handle).await;

    // Then: the handle no longer answers and reports the cancellation
    assert_eq!(handle.status().await, Err(SubscriberError::AlreadyStopped));
    assert_eq!(handle.wait().await, Err(SubscriberError::Cancelled));
    assert!(drops.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_leaves_no_store_traffic_behind() {
    // Given: an instance heartbeating quickly
    let endpoint = endpoint("quiesce");
    let log = InMemoryEventLog::new();
    let store = InMemoryOwnershipStore::new();
    let streams: Vec<_> = (0..2).map(|bucket| stream_in_bucket(2, bucket, 0)).collect();
    let _ = append_round(&log, &streams, 0);

    let handle = CompetingSubscriber::new(
        fast_config(&endpoint, 2, 2)
            .with_pause_on_free_buckets(true)
            .build()
            .expect("valid config"),
        store.clone(),
        log,
        RecordingDispatcher::new(),
    )
    .await
    .subscribe_to_all();
    let _ = wait_for_status(&handle, |status| status.claimed.len() == 2).await;

    // When: it shuts down
    handle.shutdown().await.expect("clean shutdown");

    // Then: no heartbeat, scan or claim reaches the store afterwards
    let calls = store.call_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.call_count(), calls);
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_store_is_logged_and_processing_continues() {
    // Given: a store where every call fails
    let endpoint = endpoint("outage");
    let log = InMemoryEventLog::new();
    let streams: Vec<_> = (0..2).map(|bucket| stream_in_bucket(2, bucket, 0)).collect();
    let _ = append_round(&log, &streams, 0);
    let store = InMemoryOwnershipStore::new()
        .with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0));

    // When: an instance subscribes
    let dispatcher = RecordingDispatcher::new();
    let handle = CompetingSubscriber::new(
        fast_config(&endpoint, 2, 2)
            .with_pause_on_free_buckets(true)
            .build()
            .expect("valid config"),
        store,
        log.clone(),
        dispatcher.clone(),
    )
    .await
    .subscribe_to_all();

    // Then: it keeps running without owning or dispatching anything
    let _ = wait_for_status(&handle, |status| status.live).await;
    let _ = append_round(&log, &streams, 1);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = handle.status().await.expect("still running");
    assert!(status.claimed.is_empty());
    assert!(dispatcher.positions().is_empty());
    assert!(!handle.is_finished());

    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_claims_time_out_and_the_event_is_skipped() {
    // Given: a store that answers far slower than the claim timeout
    let endpoint = endpoint("timeout");
    let log = InMemoryEventLog::new();
    let streams = vec![stream_in_bucket(1, 0, 0)];
    let _ = append_round(&log, &streams, 0);
    let store = InMemoryOwnershipStore::new()
        .with_chaos(ChaosConfig::deterministic().with_latency(Duration::from_secs(2)));

    // When: an instance subscribes with a short claim timeout
    let dispatcher = RecordingDispatcher::new();
    let handle = CompetingSubscriber::new(
        steady_config(&endpoint, 1, 1)
            .with_claim_timeout(Duration::from_millis(50))
            .build()
            .expect("valid config"),
        store,
        log,
        dispatcher.clone(),
    )
    .await
    .subscribe_to_all();

    // Then: it reaches the live tail without owning or dispatching anything
    let status = wait_for_status(&handle, |status| status.live).await;
    assert!(status.claimed.is_empty());
    assert!(dispatcher.positions().is_empty());

    handle.shutdown().await.expect("clean shutdown");
}
