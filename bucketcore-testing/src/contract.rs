//! Behavioral contracts every adapter must honor.
//!
//! Each scenario is a plain async function returning [`ContractTestResult`],
//! and the [`ownership_store_contract_tests!`] and [`event_log_contract_tests!`]
//! macros expand them into one `#[tokio::test]` per scenario. Scenarios key
//! their records under a fresh endpoint name so they can share a database.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bucketcore_memory::InMemoryEventLog;
use bucketcore_types::{
    BatchSize, BucketId, BucketKey, ConsumerId, EndpointName, EventLog, LogPosition, NewEntry,
    OwnershipOutcome, OwnershipStore, OwnershipStoreError, ReaderSignal, SignalStream,
    StartPosition, StreamId, Timestamp,
};
use futures::StreamExt;
use uuid::Uuid;

/// How long a scenario waits for the next subscription signal.
const SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A failed contract scenario.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(
        scenario: &'static str,
        operation: &'static str,
        error: &OwnershipStoreError,
    ) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn unexpected_outcome(
        scenario: &'static str,
        operation: &'static str,
        expected: OwnershipOutcome,
        observed: OwnershipOutcome,
    ) -> Self {
        Self::new(
            scenario,
            format!("{operation} expected {expected:?} but observed {observed:?}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

/// An event log the contract suite can write to.
///
/// `EventLog` only reads; scenarios need to seed entries before subscribing
/// and append while a subscription is live.
pub trait AppendableEventLog: EventLog {
    /// Append entries in order and return their positions.
    fn append_entries(&self, entries: Vec<NewEntry>) -> Vec<LogPosition>;
}

impl AppendableEventLog for InMemoryEventLog {
    fn append_entries(&self, entries: Vec<NewEntry>) -> Vec<LogPosition> {
        self.append_all(entries)
    }
}

fn contract_key(scenario: &'static str, bucket: u32) -> Result<BucketKey, ContractTestFailure> {
    // Fresh endpoint per run so scenarios can share a database
    let raw = format!("contract-{scenario}-{}", Uuid::now_v7());

    let endpoint = EndpointName::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(
            scenario,
            format!("unable to construct endpoint `{raw}`: {error}"),
        )
    })?;
    Ok(BucketKey::new(endpoint, BucketId::new(bucket)))
}

fn contract_owner(
    scenario: &'static str,
    label: &str,
) -> Result<ConsumerId, ContractTestFailure> {
    let raw = format!("{label}-{}", Uuid::now_v7());

    ConsumerId::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(
            scenario,
            format!("unable to construct consumer id `{raw}`: {error}"),
        )
    })
}

fn expect_outcome(
    scenario: &'static str,
    operation: &'static str,
    expected: OwnershipOutcome,
    observed: OwnershipOutcome,
) -> ContractTestResult {
    if observed == expected {
        Ok(())
    } else {
        Err(ContractTestFailure::unexpected_outcome(
            scenario, operation, expected, observed,
        ))
    }
}

async fn read_owner<S: OwnershipStore>(
    scenario: &'static str,
    store: &S,
    key: &BucketKey,
) -> Result<Option<ConsumerId>, ContractTestFailure> {
    store
        .record(key)
        .await
        .map(|record| record.map(|record| record.owner))
        .map_err(|error| ContractTestFailure::store_error(scenario, "record", &error))
}

async fn read_position<S: OwnershipStore>(
    scenario: &'static str,
    store: &S,
    key: &BucketKey,
) -> Result<Option<LogPosition>, ContractTestFailure> {
    store
        .last_position(key)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "last_position", &error))
}

async fn read_heartbeat<S: OwnershipStore>(
    scenario: &'static str,
    store: &S,
    key: &BucketKey,
) -> Result<Timestamp, ContractTestFailure> {
    store
        .last_heartbeat(key)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "last_heartbeat", &error))?
        .ok_or_else(|| ContractTestFailure::assertion(scenario, "expected a recorded heartbeat"))
}

pub async fn test_claim_unowned_bucket<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "claim_unowned_bucket";

    let store = make_store();
    let key = contract_key(SCENARIO, 3)?;
    let owner = contract_owner(SCENARIO, "a")?;

    let outcome = store
        .check_or_save(&key, &owner, LogPosition::new(7))
        .await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;

    if read_owner(SCENARIO, &store, &key).await? != Some(owner) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "record does not name the claiming instance as owner",
        ));
    }

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(7)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected the claim position 7 to be recorded, observed {position:?}"),
        ));
    }

    Ok(())
}

pub async fn test_claim_owned_elsewhere_conflicts<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "claim_owned_elsewhere_conflicts";

    let store = make_store();
    let key = contract_key(SCENARIO, 0)?;
    let first = contract_owner(SCENARIO, "a")?;
    let second = contract_owner(SCENARIO, "b")?;

    let outcome = store.check_or_save(&key, &first, LogPosition::new(1)).await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;

    let outcome = store
        .check_or_save(&key, &second, LogPosition::new(2))
        .await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Conflict, outcome)?;

    if read_owner(SCENARIO, &store, &key).await? != Some(first) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "a conflicting claim replaced the owner",
        ));
    }

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(1)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("a conflicting claim moved the position to {position:?}"),
        ));
    }

    Ok(())
}

pub async fn test_reclaim_by_owner_succeeds<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "reclaim_by_owner_succeeds";

    let store = make_store();
    let key = contract_key(SCENARIO, 1)?;
    let owner = contract_owner(SCENARIO, "a")?;

    let outcome = store.check_or_save(&key, &owner, LogPosition::new(4)).await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;

    let outcome = store.check_or_save(&key, &owner, LogPosition::new(9)).await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(9)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected the re-claim to record position 9, observed {position:?}"),
        ));
    }

    Ok(())
}

pub async fn test_concurrent_claims_have_one_winner<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "concurrent_claims_have_one_winner";
    const CONTENDERS: usize = 8;

    let store = Arc::new(make_store());
    let key = contract_key(SCENARIO, 5)?;
    let owners = (0..CONTENDERS)
        .map(|index| contract_owner(SCENARIO, &format!("contender{index}")))
        .collect::<Result<Vec<_>, _>>()?;

    let claims = owners.iter().map(|owner| {
        let store = Arc::clone(&store);
        let key = key.clone();
        let owner = owner.clone();
        tokio::spawn(async move { store.check_or_save(&key, &owner, LogPosition::new(0)).await })
    });

    let mut owned = 0;
    for joined in futures::future::join_all(claims).await {
        let outcome = joined.map_err(|error| {
            ContractTestFailure::assertion(SCENARIO, format!("claim task failed: {error}"))
        })?;
        match outcome {
            OwnershipOutcome::Owned => owned += 1,
            OwnershipOutcome::Conflict => {}
            OwnershipOutcome::StoreUnavailable(operation) => {
                return Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("{operation} reported the store unavailable"),
                ));
            }
        }
    }

    if owned != 1 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly one winning claim, observed {owned}"),
        ));
    }

    match read_owner(SCENARIO, store.as_ref(), &key).await? {
        Some(winner) if owners.contains(&winner) => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("record names an unexpected owner: {other:?}"),
        )),
    }
}

pub async fn test_heartbeat_requires_ownership<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "heartbeat_requires_ownership";

    let store = make_store();
    let key = contract_key(SCENARIO, 2)?;
    let unclaimed = contract_key(SCENARIO, 6)?;
    let owner = contract_owner(SCENARIO, "a")?;
    let intruder = contract_owner(SCENARIO, "b")?;

    let outcome = store.check_or_save(&key, &owner, LogPosition::new(0)).await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;

    let outcome = store
        .heartbeat(&key, &intruder, Timestamp::now(), Some(LogPosition::new(5)))
        .await;
    expect_outcome(SCENARIO, "heartbeat", OwnershipOutcome::Conflict, outcome)?;

    let outcome = store
        .heartbeat(&unclaimed, &owner, Timestamp::now(), None)
        .await;
    expect_outcome(SCENARIO, "heartbeat", OwnershipOutcome::Conflict, outcome)?;

    let outcome = store
        .heartbeat(&key, &owner, Timestamp::now(), Some(LogPosition::new(3)))
        .await;
    expect_outcome(SCENARIO, "heartbeat", OwnershipOutcome::Owned, outcome)?;

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(3)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected the owner's heartbeat to record position 3, observed {position:?}"),
        ));
    }

    Ok(())
}

pub async fn test_liveness_heartbeat_keeps_position<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "liveness_heartbeat_keeps_position";

    let store = make_store();
    let key = contract_key(SCENARIO, 4)?;
    let owner = contract_owner(SCENARIO, "a")?;

    let outcome = store
        .check_or_save(&key, &owner, LogPosition::new(12))
        .await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;
    let claimed_at = read_heartbeat(SCENARIO, &store, &key).await?;

    let later = Timestamp::now();
    let outcome = store.heartbeat(&key, &owner, later, None).await;
    expect_outcome(SCENARIO, "heartbeat", OwnershipOutcome::Owned, outcome)?;

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(12)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("a liveness-only heartbeat changed the position to {position:?}"),
        ));
    }

    let renewed_at = read_heartbeat(SCENARIO, &store, &key).await?;
    if renewed_at < claimed_at {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("heartbeat moved backwards from {claimed_at} to {renewed_at}"),
        ));
    }

    Ok(())
}

pub async fn test_adopt_compares_observed_heartbeat<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "adopt_compares_observed_heartbeat";

    let store = make_store();
    let key = contract_key(SCENARIO, 7)?;
    let stale_owner = contract_owner(SCENARIO, "stale")?;
    let adopter = contract_owner(SCENARIO, "adopter")?;
    let latecomer = contract_owner(SCENARIO, "latecomer")?;

    let outcome = store
        .check_or_save(&key, &stale_owner, LogPosition::new(20))
        .await;
    expect_outcome(SCENARIO, "check_or_save", OwnershipOutcome::Owned, outcome)?;
    let observed = read_heartbeat(SCENARIO, &store, &key).await?;

    let outcome = store
        .adopt(
            &key,
            &adopter,
            observed.before(Duration::from_secs(60)),
            Timestamp::now(),
        )
        .await;
    expect_outcome(SCENARIO, "adopt", OwnershipOutcome::Conflict, outcome)?;

    let outcome = store
        .adopt(&key, &adopter, observed, Timestamp::now())
        .await;
    expect_outcome(SCENARIO, "adopt", OwnershipOutcome::Owned, outcome)?;

    if read_owner(SCENARIO, &store, &key).await? != Some(adopter.clone()) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "a successful adoption did not transfer ownership",
        ));
    }

    let position = read_position(SCENARIO, &store, &key).await?;
    if position != Some(LogPosition::new(20)) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("adoption must keep the recorded position, observed {position:?}"),
        ));
    }

    // The same stale observation cannot win twice
    let outcome = store
        .adopt(&key, &latecomer, observed, Timestamp::now())
        .await;
    expect_outcome(SCENARIO, "adopt", OwnershipOutcome::Conflict, outcome)?;

    let outcome = store
        .heartbeat(&key, &stale_owner, Timestamp::now(), None)
        .await;
    expect_outcome(SCENARIO, "heartbeat", OwnershipOutcome::Conflict, outcome)?;

    Ok(())
}

pub async fn test_missing_records_read_as_none<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: OwnershipStore + 'static,
{
    const SCENARIO: &str = "missing_records_read_as_none";

    let store = make_store();
    let key = contract_key(SCENARIO, 9)?;
    let adopter = contract_owner(SCENARIO, "adopter")?;

    let heartbeat = store
        .last_heartbeat(&key)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "last_heartbeat", &error))?;
    let position = read_position(SCENARIO, &store, &key).await?;
    let owner = read_owner(SCENARIO, &store, &key).await?;

    if heartbeat.is_some() || position.is_some() || owner.is_some() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "an unclaimed bucket reported recorded state",
        ));
    }

    let outcome = store
        .adopt(&key, &adopter, Timestamp::now(), Timestamp::now())
        .await;
    expect_outcome(SCENARIO, "adopt", OwnershipOutcome::Conflict, outcome)
}

async fn next_signal(
    scenario: &'static str,
    stream: &mut SignalStream,
) -> Result<ReaderSignal, ContractTestFailure> {
    match tokio::time::timeout(SIGNAL_TIMEOUT, stream.next()).await {
        Ok(Some(signal)) => Ok(signal),
        Ok(None) => Err(ContractTestFailure::assertion(
            scenario,
            "subscription ended without a drop signal",
        )),
        Err(_) => Err(ContractTestFailure::assertion(
            scenario,
            format!("no signal within {SIGNAL_TIMEOUT:?}"),
        )),
    }
}

async fn expect_event(
    scenario: &'static str,
    stream: &mut SignalStream,
    position: LogPosition,
) -> ContractTestResult {
    match next_signal(scenario, stream).await? {
        ReaderSignal::Event(entry) if entry.position == position => Ok(()),
        other => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected the entry at {position}, observed {other:?}"),
        )),
    }
}

async fn expect_caught_up(scenario: &'static str, stream: &mut SignalStream) -> ContractTestResult {
    match next_signal(scenario, stream).await? {
        ReaderSignal::CaughtUp => Ok(()),
        other => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected caught up, observed {other:?}"),
        )),
    }
}

fn contract_entries(
    scenario: &'static str,
    streams: &[&str],
) -> Result<Vec<NewEntry>, ContractTestFailure> {
    streams
        .iter()
        .enumerate()
        .map(|(index, stream)| {
            let stream_id = StreamId::try_new(*stream).map_err(|error| {
                ContractTestFailure::assertion(scenario, format!("invalid stream id: {error}"))
            })?;
            NewEntry::json(stream_id, "ContractTestEvent", &serde_json::json!({ "n": index }))
                .map_err(|error| {
                    ContractTestFailure::assertion(scenario, format!("encode failed: {error}"))
                })
        })
        .collect()
}

fn batch_size(scenario: &'static str, size: usize) -> Result<BatchSize, ContractTestFailure> {
    BatchSize::try_new(size).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid batch size: {error}"))
    })
}

pub async fn test_replay_is_ordered_then_caught_up<F, L>(make_log: F) -> ContractTestResult
where
    F: Fn() -> L + Send + Sync + Clone + 'static,
    L: AppendableEventLog + 'static,
{
    const SCENARIO: &str = "replay_is_ordered_then_caught_up";

    let log = make_log();
    let positions = log.append_entries(contract_entries(
        SCENARIO,
        &["order-1", "order-2", "order-1", "order-3", "order-2"],
    )?);

    // A batch smaller than the history forces several refills
    let mut stream = log.subscribe(StartPosition::Beginning, batch_size(SCENARIO, 2)?);
    for position in &positions {
        expect_event(SCENARIO, &mut stream, *position).await?;
    }
    expect_caught_up(SCENARIO, &mut stream).await
}

pub async fn test_start_after_is_exclusive<F, L>(make_log: F) -> ContractTestResult
where
    F: Fn() -> L + Send + Sync + Clone + 'static,
    L: AppendableEventLog + 'static,
{
    const SCENARIO: &str = "start_after_is_exclusive";

    let log = make_log();
    let positions =
        log.append_entries(contract_entries(SCENARIO, &["order-1", "order-2", "order-3"])?);

    let mut stream = log.subscribe(
        StartPosition::After(positions[0]),
        batch_size(SCENARIO, 10)?,
    );
    for position in &positions[1..] {
        expect_event(SCENARIO, &mut stream, *position).await?;
    }
    expect_caught_up(SCENARIO, &mut stream).await
}

pub async fn test_live_appends_follow_caught_up<F, L>(make_log: F) -> ContractTestResult
where
    F: Fn() -> L + Send + Sync + Clone + 'static,
    L: AppendableEventLog + 'static,
{
    const SCENARIO: &str = "live_appends_follow_caught_up";

    let log = make_log();
    let history = log.append_entries(contract_entries(SCENARIO, &["order-1"])?);

    let mut stream = log.subscribe(StartPosition::Beginning, batch_size(SCENARIO, 10)?);
    expect_event(SCENARIO, &mut stream, history[0]).await?;
    expect_caught_up(SCENARIO, &mut stream).await?;

    let live = log.append_entries(contract_entries(SCENARIO, &["order-2", "order-3"])?);
    for position in &live {
        expect_event(SCENARIO, &mut stream, *position).await?;
    }

    Ok(())
}

pub async fn test_control_entries_are_filtered<F, L>(make_log: F) -> ContractTestResult
where
    F: Fn() -> L + Send + Sync + Clone + 'static,
    L: AppendableEventLog + 'static,
{
    const SCENARIO: &str = "control_entries_are_filtered";

    let log = make_log();
    let positions = log.append_entries(contract_entries(
        SCENARIO,
        &["$settings", "order-1", "$stats-0", "order-2"],
    )?);

    let mut stream = log.subscribe(StartPosition::Beginning, batch_size(SCENARIO, 1)?);
    expect_event(SCENARIO, &mut stream, positions[1]).await?;
    expect_event(SCENARIO, &mut stream, positions[3]).await?;
    expect_caught_up(SCENARIO, &mut stream).await
}

/// Expands the ownership store contract into one test per scenario.
///
/// ```ignore
/// ownership_store_contract_tests! {
///     suite = in_memory,
///     make_store = bucketcore_memory::InMemoryOwnershipStore::new,
/// }
/// ```
#[macro_export]
macro_rules! ownership_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        mod $suite {
            use $crate::contract::{
                test_adopt_compares_observed_heartbeat, test_claim_owned_elsewhere_conflicts,
                test_claim_unowned_bucket, test_concurrent_claims_have_one_winner,
                test_heartbeat_requires_ownership, test_liveness_heartbeat_keeps_position,
                test_missing_records_read_as_none, test_reclaim_by_owner_succeeds,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn claim_unowned_bucket_contract() {
                test_claim_unowned_bucket($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn claim_owned_elsewhere_conflicts_contract() {
                test_claim_owned_elsewhere_conflicts($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn reclaim_by_owner_succeeds_contract() {
                test_reclaim_by_owner_succeeds($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_claims_have_one_winner_contract() {
                test_concurrent_claims_have_one_winner($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn heartbeat_requires_ownership_contract() {
                test_heartbeat_requires_ownership($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn liveness_heartbeat_keeps_position_contract() {
                test_liveness_heartbeat_keeps_position($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn adopt_compares_observed_heartbeat_contract() {
                test_adopt_compares_observed_heartbeat($make_store)
                    .await
                    .expect("ownership store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn missing_records_read_as_none_contract() {
                test_missing_records_read_as_none($make_store)
                    .await
                    .expect("ownership store contract failed");
            }
        }
    };
}

pub use ownership_store_contract_tests;

/// Expands the event log contract into one test per scenario.
#[macro_export]
macro_rules! event_log_contract_tests {
    (suite = $suite:ident, make_log = $make_log:expr $(,)?) => {
        mod $suite {
            use $crate::contract::{
                test_control_entries_are_filtered, test_live_appends_follow_caught_up,
                test_replay_is_ordered_then_caught_up, test_start_after_is_exclusive,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn replay_is_ordered_then_caught_up_contract() {
                test_replay_is_ordered_then_caught_up($make_log)
                    .await
                    .expect("event log contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn start_after_is_exclusive_contract() {
                test_start_after_is_exclusive($make_log)
                    .await
                    .expect("event log contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn live_appends_follow_caught_up_contract() {
                test_live_appends_follow_caught_up($make_log)
                    .await
                    .expect("event log contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn control_entries_are_filtered_contract() {
                test_control_entries_are_filtered($make_log)
                    .await
                    .expect("event log contract failed");
            }
        }
    };
}

pub use event_log_contract_tests;
