//! In-memory claim state of one subscriber.
//!
//! `ClaimState` is owned exclusively by the orchestration loop. It holds the
//! buckets this instance believes it owns, the positions seen for everything
//! else since the last heartbeat cycle, and the single adoption in flight.
//! Nothing here performs I/O: routing returns a decision, heartbeat planning
//! returns the calls to make, and reports are applied back afterwards.

use std::collections::{BTreeMap, BTreeSet};

use bucketcore_types::{BucketId, LogPosition};

/// Identifies one adoption attempt; signals from abandoned attempts are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct AdoptionId(pub(crate) u64);

impl std::fmt::Display for AdoptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Adoption {
    pub(crate) id: AdoptionId,
    pub(crate) bucket: BucketId,
    pub(crate) cursor: Option<LogPosition>,
}

/// What to do with an event on the primary path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// The bucket is claimed: dispatch.
    Dispatch,
    /// Try to claim the bucket, then dispatch on success.
    TryClaim,
    /// Record and skip.
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkipReason {
    AtCapacity,
    AlreadyContested,
    Adopting,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtCapacity => write!(f, "at capacity"),
            Self::AlreadyContested => write!(f, "already contested this cycle"),
            Self::Adopting => write!(f, "bucket under adoption"),
        }
    }
}

/// Store calls for one heartbeat cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HeartbeatPlan {
    /// Claimed buckets with activity, renewed with their latest position.
    pub(crate) renew: Vec<(BucketId, LogPosition)>,
    /// Claimed buckets without activity, renewed with a liveness-only ping.
    pub(crate) ping: Vec<BucketId>,
    /// The adoption in flight, when its bucket saw activity.
    pub(crate) adoption: Option<Adoption>,
    /// Seen but unclaimed buckets to check for an orphaned lease, in order.
    pub(crate) candidates: Vec<BucketId>,
}

impl HeartbeatPlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.renew.is_empty()
            && self.ping.is_empty()
            && self.adoption.is_none()
            && self.candidates.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ClaimState {
    limit: usize,
    claimed: BTreeSet<BucketId>,
    seen: BTreeMap<BucketId, LogPosition>,
    adoption: Option<Adoption>,
    next_adoption: u64,
}

impl ClaimState {
    pub(crate) const fn new(limit: usize) -> Self {
        Self {
            limit,
            claimed: BTreeSet::new(),
            seen: BTreeMap::new(),
            adoption: None,
            next_adoption: 0,
        }
    }

    pub(crate) const fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub(crate) fn claimed(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.claimed.iter().copied()
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.seen.keys().copied()
    }

    pub(crate) const fn adoption(&self) -> Option<Adoption> {
        self.adoption
    }

    pub(crate) fn is_claimed(&self, bucket: BucketId) -> bool {
        self.claimed.contains(&bucket)
    }

    // An adoption in flight reserves one slot of the claim limit
    fn at_capacity(&self) -> bool {
        self.claimed.len() + usize::from(self.adoption.is_some()) >= self.limit
    }

    /// Decide the fate of an event for `bucket` at `position`.
    ///
    /// Every outcome except `TryClaim` records the position immediately; the
    /// claim attempt records it through [`claim_succeeded`](Self::claim_succeeded)
    /// or [`claim_failed`](Self::claim_failed).
    pub(crate) fn route(&mut self, bucket: BucketId, position: LogPosition) -> Route {
        if self.claimed.contains(&bucket) {
            self.record(bucket, position);
            return Route::Dispatch;
        }

        let reason = if self.adoption.is_some_and(|adoption| adoption.bucket == bucket) {
            SkipReason::Adopting
        } else if self.at_capacity() {
            SkipReason::AtCapacity
        } else if self.seen.contains_key(&bucket) {
            SkipReason::AlreadyContested
        } else {
            return Route::TryClaim;
        };

        self.record(bucket, position);
        Route::Skip(reason)
    }

    pub(crate) fn claim_succeeded(&mut self, bucket: BucketId, position: LogPosition) {
        let _ = self.claimed.insert(bucket);
        self.record(bucket, position);
    }

    pub(crate) fn claim_failed(&mut self, bucket: BucketId, position: LogPosition) {
        self.record(bucket, position);
    }

    fn record(&mut self, bucket: BucketId, position: LogPosition) {
        let _ = self.seen.insert(bucket, position);
    }

    /// Snapshot and clear the seen positions into the calls for one cycle.
    pub(crate) fn plan_heartbeat(&mut self) -> HeartbeatPlan {
        let seen = std::mem::take(&mut self.seen);
        let mut plan = HeartbeatPlan::default();
        let may_adopt = self.adoption.is_none() && self.claimed.len() < self.limit;

        for (&bucket, &position) in &seen {
            if self.claimed.contains(&bucket) {
                plan.renew.push((bucket, position));
            } else if let Some(adoption) = self.adoption.filter(|a| a.bucket == bucket) {
                plan.adoption = Some(adoption);
            } else if may_adopt {
                plan.candidates.push(bucket);
            }
        }

        plan.ping = self
            .claimed
            .iter()
            .copied()
            .filter(|bucket| !seen.contains_key(bucket))
            .collect();

        plan
    }

    /// Forget a claim the store no longer honours.
    pub(crate) fn evict(&mut self, bucket: BucketId) -> bool {
        self.claimed.remove(&bucket)
    }

    /// Reserve the adoption slot for `bucket`.
    pub(crate) fn begin_adoption(&mut self, bucket: BucketId) -> Option<AdoptionId> {
        if self.adoption.is_some()
            || self.claimed.len() >= self.limit
            || self.claimed.contains(&bucket)
        {
            return None;
        }

        let id = AdoptionId(self.next_adoption);
        self.next_adoption += 1;
        self.adoption = Some(Adoption {
            id,
            bucket,
            cursor: None,
        });
        Some(id)
    }

    /// Whether `id` is the adoption in flight.
    pub(crate) fn is_adopting(&self, id: AdoptionId) -> bool {
        self.adoption.is_some_and(|adoption| adoption.id == id)
    }

    pub(crate) fn advance_adoption(&mut self, id: AdoptionId, position: Option<LogPosition>) {
        if let Some(adoption) = self.adoption.as_mut().filter(|a| a.id == id) {
            adoption.cursor = position.max(adoption.cursor);
        }
    }

    /// Hand the adopted bucket over to the primary path.
    pub(crate) fn complete_adoption(&mut self, id: AdoptionId) -> Option<BucketId> {
        let adoption = self.adoption.filter(|a| a.id == id)?;
        self.adoption = None;
        let _ = self.claimed.insert(adoption.bucket);
        Some(adoption.bucket)
    }

    pub(crate) fn abandon_adoption(&mut self, id: AdoptionId) -> Option<BucketId> {
        let adoption = self.adoption.filter(|a| a.id == id)?;
        self.adoption = None;
        Some(adoption.bucket)
    }

    /// Forget everything; local beliefs must be re-derived from the store.
    pub(crate) fn clear(&mut self) {
        self.claimed.clear();
        self.seen.clear();
        self.adoption = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(id: u32) -> BucketId {
        BucketId::new(id)
    }

    fn pos(position: u64) -> LogPosition {
        LogPosition::new(position)
    }

    #[test]
    fn unseen_bucket_under_limit_is_claimable() {
        let mut state = ClaimState::new(2);

        assert_eq!(state.route(bucket(0), pos(1)), Route::TryClaim);
        assert_eq!(state.pending().count(), 0);
    }

    #[test]
    fn claimed_bucket_dispatches_and_records_position() {
        let mut state = ClaimState::new(2);
        state.claim_succeeded(bucket(0), pos(1));

        assert_eq!(state.route(bucket(0), pos(7)), Route::Dispatch);

        let plan = state.plan_heartbeat();
        assert_eq!(plan.renew, vec![(bucket(0), pos(7))]);
    }

    #[test]
    fn failed_claim_is_not_retried_within_a_cycle() {
        let mut state = ClaimState::new(2);
        state.claim_failed(bucket(0), pos(1));

        assert_eq!(
            state.route(bucket(0), pos(2)),
            Route::Skip(SkipReason::AlreadyContested)
        );

        // The next cycle forgets the failed attempt
        let _ = state.plan_heartbeat();
        assert_eq!(state.route(bucket(0), pos(3)), Route::TryClaim);
    }

    #[test]
    fn full_instance_sheds_load() {
        let mut state = ClaimState::new(1);
        state.claim_succeeded(bucket(0), pos(1));

        assert_eq!(
            state.route(bucket(1), pos(2)),
            Route::Skip(SkipReason::AtCapacity)
        );
        assert_eq!(state.pending().collect::<Vec<_>>(), vec![bucket(0), bucket(1)]);
    }

    #[test]
    fn plan_pings_quiet_claims_and_lists_candidates() {
        let mut state = ClaimState::new(3);
        state.claim_succeeded(bucket(0), pos(1));
        state.claim_succeeded(bucket(1), pos(2));
        let _ = state.plan_heartbeat();
        assert_eq!(state.route(bucket(1), pos(5)), Route::Dispatch);
        state.claim_failed(bucket(2), pos(6));

        let plan = state.plan_heartbeat();

        assert_eq!(plan.renew, vec![(bucket(1), pos(5))]);
        assert_eq!(plan.ping, vec![bucket(0)]);
        assert_eq!(plan.candidates, vec![bucket(2)]);
        assert_eq!(plan.adoption, None);
        assert_eq!(state.pending().count(), 0);
    }

    #[test]
    fn no_candidates_when_at_limit() {
        let mut state = ClaimState::new(1);
        state.claim_succeeded(bucket(0), pos(1));
        let _ = state.route(bucket(1), pos(2));

        let plan = state.plan_heartbeat();

        assert!(plan.candidates.is_empty());
    }

    #[test]
    fn adopting_bucket_is_skipped_and_heartbeated_with_cursor() {
        let mut state = ClaimState::new(2);
        let id = state.begin_adoption(bucket(3)).expect("slot free");
        state.advance_adoption(id, Some(pos(4)));

        assert_eq!(
            state.route(bucket(3), pos(9)),
            Route::Skip(SkipReason::Adopting)
        );

        let plan = state.plan_heartbeat();
        let adoption = plan.adoption.expect("adoption heartbeat planned");
        assert_eq!(adoption.bucket, bucket(3));
        assert_eq!(adoption.cursor, Some(pos(4)));
        assert!(plan.candidates.is_empty());
    }

    #[test]
    fn adoption_reserves_a_claim_slot() {
        let mut state = ClaimState::new(2);
        state.claim_succeeded(bucket(0), pos(1));
        let _ = state.begin_adoption(bucket(3)).expect("slot free");

        assert_eq!(
            state.route(bucket(1), pos(2)),
            Route::Skip(SkipReason::AtCapacity)
        );
    }

    #[test]
    fn only_one_adoption_at_a_time() {
        let mut state = ClaimState::new(4);
        assert!(state.begin_adoption(bucket(1)).is_some());
        assert!(state.begin_adoption(bucket(2)).is_none());
    }

    #[test]
    fn completed_adoption_becomes_a_claim() {
        let mut state = ClaimState::new(2);
        let id = state.begin_adoption(bucket(3)).expect("slot free");

        assert_eq!(state.complete_adoption(id), Some(bucket(3)));
        assert!(state.is_claimed(bucket(3)));
        assert_eq!(state.adoption(), None);
        assert_eq!(state.route(bucket(3), pos(1)), Route::Dispatch);
    }

    #[test]
    fn signals_from_an_abandoned_adoption_are_ignored() {
        let mut state = ClaimState::new(2);
        let first = state.begin_adoption(bucket(3)).expect("slot free");
        assert_eq!(state.abandon_adoption(first), Some(bucket(3)));
        let second = state.begin_adoption(bucket(3)).expect("slot free");

        assert_eq!(state.complete_adoption(first), None);
        assert!(state.is_adopting(second));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut state = ClaimState::new(2);
        let id = state.begin_adoption(bucket(3)).expect("slot free");
        state.advance_adoption(id, Some(pos(8)));
        state.advance_adoption(id, Some(pos(5)));

        assert_eq!(state.adoption().and_then(|a| a.cursor), Some(pos(8)));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut state = ClaimState::new(2);
        state.claim_succeeded(bucket(0), pos(1));
        let _ = state.begin_adoption(bucket(1));

        state.clear();

        assert_eq!(state.claimed_count(), 0);
        assert_eq!(state.adoption(), None);
        assert!(state.plan_heartbeat().is_empty());
    }
}
