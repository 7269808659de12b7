//! Fault injection for ownership stores.
//!
//! Wrap any [`OwnershipStore`] with [`ChaosOwnershipStoreExt::with_chaos`] to
//! make a share of its calls report an outage or a conflict, or to slow every
//! call down. Outages surface the way a real adapter reports them:
//! `StoreUnavailable` outcomes and `OwnershipStoreError::Unavailable` errors.

use std::time::Duration;

use async_trait::async_trait;
use bucketcore_types::{
    BucketKey, ConsumerId, LogPosition, Operation, OwnershipOutcome, OwnershipRecord,
    OwnershipStore, OwnershipStoreError, Timestamp,
};
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};

/// Probability value for chaos injection rates.
///
/// A value in the range [0.0, 1.0] where 0.0 means never inject and 1.0
/// means always inject.
///
/// # Examples
///
/// ```ignore
/// use bucketcore_testing::chaos::Probability;
///
/// let sometimes = Probability::try_new(0.5).unwrap();
///
/// // Values outside [0.0, 1.0] are rejected
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// What to inject and how often.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    conflict_probability: Probability,
    latency: Option<Duration>,
}

impl ChaosConfig {
    /// A configuration with a fixed seed, so injected faults repeat run to run.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Share of calls that report the store as unavailable.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = clamped(probability);
        self
    }

    /// Share of claims, heartbeats and adoptions answered with `Conflict`.
    #[must_use]
    pub fn with_conflict_probability(mut self, probability: f32) -> Self {
        self.conflict_probability = clamped(probability);
        self
    }

    /// Delay added before every call reaches the wrapped store.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: clamped(0.0),
            conflict_probability: clamped(0.0),
            latency: None,
        }
    }
}

fn clamped(probability: f32) -> Probability {
    let value = if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    };
    Probability::try_new(value).unwrap_or_else(|_| unreachable!("clamped value is always valid"))
}

/// Adds [`with_chaos`](ChaosOwnershipStoreExt::with_chaos) to every ownership store.
pub trait ChaosOwnershipStoreExt: Sized {
    /// Wrap the store in a fault-injecting decorator.
    fn with_chaos(self, config: ChaosConfig) -> ChaosOwnershipStore<Self>;
}

impl<S> ChaosOwnershipStoreExt for S
where
    S: OwnershipStore,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosOwnershipStore<Self> {
        ChaosOwnershipStore::new(self, config)
    }
}

/// An ownership store decorator injecting faults according to a [`ChaosConfig`].
pub struct ChaosOwnershipStore<S> {
    store: S,
    config: ChaosConfig,
    failure_probability: Mutex<Probability>,
    rng: Mutex<StdRng>,
}

impl<S> ChaosOwnershipStore<S> {
    /// Wrap `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            failure_probability: Mutex::new(config.failure_probability),
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Change the share of calls that report an outage from now on.
    ///
    /// Lets a test start an instance against a healthy store and cut it off
    /// later, while the instance keeps running.
    pub fn set_failure_probability(&self, probability: f32) {
        *self.failure_probability.lock() = clamped(probability);
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }

    async fn delay(&self) {
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Injected outcome for an ownership-changing call, if any.
    async fn intercept(&self, operation: Operation) -> Option<OwnershipOutcome> {
        self.delay().await;

        if self.should_inject(self.config.conflict_probability) {
            tracing::debug!(%operation, "chaos: injecting conflict");
            return Some(OwnershipOutcome::Conflict);
        }

        let failure = *self.failure_probability.lock();
        if self.should_inject(failure) {
            tracing::debug!(%operation, "chaos: injecting outage");
            return Some(OwnershipOutcome::StoreUnavailable(operation));
        }

        None
    }

    /// Injected error for a query, if any.
    async fn intercept_query(&self, operation: Operation) -> Result<(), OwnershipStoreError> {
        self.delay().await;

        let failure = *self.failure_probability.lock();
        if self.should_inject(failure) {
            tracing::debug!(%operation, "chaos: injecting outage");
            return Err(OwnershipStoreError::unavailable(
                operation,
                "injected by chaos store",
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl<S> OwnershipStore for ChaosOwnershipStore<S>
where
    S: OwnershipStore,
{
    async fn check_or_save(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        position: LogPosition,
    ) -> OwnershipOutcome {
        if let Some(outcome) = self.intercept(Operation::CheckOrSave).await {
            return outcome;
        }
        self.store.check_or_save(key, owner, position).await
    }

    async fn heartbeat(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        now: Timestamp,
        position: Option<LogPosition>,
    ) -> OwnershipOutcome {
        if let Some(outcome) = self.intercept(Operation::Heartbeat).await {
            return outcome;
        }
        self.store.heartbeat(key, owner, now, position).await
    }

    async fn adopt(
        &self,
        key: &BucketKey,
        owner: &ConsumerId,
        observed_heartbeat: Timestamp,
        now: Timestamp,
    ) -> OwnershipOutcome {
        if let Some(outcome) = self.intercept(Operation::Adopt).await {
            return outcome;
        }
        self.store.adopt(key, owner, observed_heartbeat, now).await
    }

    async fn last_heartbeat(
        &self,
        key: &BucketKey,
    ) -> Result<Option<Timestamp>, OwnershipStoreError> {
        self.intercept_query(Operation::LastHeartbeat).await?;
        self.store.last_heartbeat(key).await
    }

    async fn last_position(
        &self,
        key: &BucketKey,
    ) -> Result<Option<LogPosition>, OwnershipStoreError> {
        self.intercept_query(Operation::LastPosition).await?;
        self.store.last_position(key).await
    }

    async fn record(
        &self,
        key: &BucketKey,
    ) -> Result<Option<OwnershipRecord>, OwnershipStoreError> {
        self.intercept_query(Operation::ReadRecord).await?;
        self.store.record(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketcore_memory::InMemoryOwnershipStore;
    use bucketcore_types::{BucketId, EndpointName};

    fn key() -> BucketKey {
        BucketKey::new(
            EndpointName::try_new("chaos").expect("valid endpoint"),
            BucketId::new(0),
        )
    }

    fn owner() -> ConsumerId {
        ConsumerId::try_new("chaos-owner").expect("valid consumer id")
    }

    #[test]
    fn deterministic_config_sets_seed() {
        let default_is_none = ChaosConfig::default().deterministic_seed.is_none();
        let deterministic_is_some = ChaosConfig::deterministic().deterministic_seed.is_some();

        assert!(default_is_none && deterministic_is_some);
    }

    #[test]
    fn out_of_range_probabilities_are_clamped() {
        let config = ChaosConfig::default()
            .with_failure_probability(3.0)
            .with_conflict_probability(-1.0);

        assert!((config.failure_probability.into_inner() - 1.0).abs() < f32::EPSILON);
        assert!(config.conflict_probability.into_inner().abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn zero_probability_passes_calls_through() {
        let store = InMemoryOwnershipStore::new().with_chaos(ChaosConfig::default());

        let outcome = store
            .check_or_save(&key(), &owner(), LogPosition::new(3))
            .await;

        assert_eq!(outcome, OwnershipOutcome::Owned);
        assert_eq!(
            store.last_position(&key()).await,
            Ok(Some(LogPosition::new(3)))
        );
    }

    #[tokio::test]
    async fn certain_failure_never_reaches_the_wrapped_store() {
        let store = InMemoryOwnershipStore::new()
            .with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0));

        let outcome = store
            .check_or_save(&key(), &owner(), LogPosition::new(0))
            .await;
        let query = store.last_heartbeat(&key()).await;

        assert_eq!(
            outcome,
            OwnershipOutcome::StoreUnavailable(Operation::CheckOrSave)
        );
        assert_eq!(
            query.map_err(|error| error.operation()),
            Err(Operation::LastHeartbeat)
        );
        assert_eq!(store.inner().call_count(), 0);
    }

    #[tokio::test]
    async fn conflicts_take_precedence_over_outages() {
        let store = InMemoryOwnershipStore::new().with_chaos(
            ChaosConfig::deterministic()
                .with_conflict_probability(1.0)
                .with_failure_probability(1.0),
        );

        let outcome = store
            .heartbeat(&key(), &owner(), Timestamp::now(), None)
            .await;

        assert_eq!(outcome, OwnershipOutcome::Conflict);
    }

    #[tokio::test]
    async fn outages_can_start_after_construction() {
        let store = InMemoryOwnershipStore::new().with_chaos(ChaosConfig::deterministic());
        let healthy = store
            .check_or_save(&key(), &owner(), LogPosition::new(0))
            .await;

        store.set_failure_probability(1.0);
        let cut_off = store
            .heartbeat(&key(), &owner(), Timestamp::now(), None)
            .await;

        assert_eq!(healthy, OwnershipOutcome::Owned);
        assert_eq!(
            cut_off,
            OwnershipOutcome::StoreUnavailable(Operation::Heartbeat)
        );
        assert_eq!(store.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn latency_delays_every_call() {
        let store = InMemoryOwnershipStore::new()
            .with_chaos(ChaosConfig::default().with_latency(Duration::from_millis(50)));

        let started = tokio::time::Instant::now();
        let _ = store.record(&key()).await;

        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
