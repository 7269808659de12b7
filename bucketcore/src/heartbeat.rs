//! One heartbeat cycle against the ownership store.
//!
//! The orchestration loop plans a cycle from its claim state
//! ([`ClaimState::plan_heartbeat`](crate::claims::ClaimState::plan_heartbeat)),
//! runs it off-loop with [`run_heartbeat_cycle`] and applies the resulting
//! [`HeartbeatReport`] when it comes back.

use std::time::Duration;

use bucketcore_types::{
    BucketId, BucketKey, ConsumerId, EndpointName, OwnershipOutcome, OwnershipStore, Timestamp,
};
use tracing::{debug, warn};

use crate::claims::{AdoptionId, HeartbeatPlan};

/// A bucket whose lease has expired, with the stale heartbeat that proves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Orphan {
    pub(crate) bucket: BucketId,
    pub(crate) observed_heartbeat: Timestamp,
}

/// Outcome of one heartbeat cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HeartbeatReport {
    /// Claimed buckets whose heartbeat returned `Conflict`.
    pub(crate) lost: Vec<BucketId>,
    /// The adoption whose heartbeat returned `Conflict`.
    pub(crate) adoption_lost: Option<AdoptionId>,
    /// The first expired candidate, if any.
    pub(crate) orphan: Option<Orphan>,
    /// Number of store calls that failed.
    pub(crate) unavailable: usize,
}

pub(crate) struct HeartbeatContext<'a, S: ?Sized> {
    pub(crate) store: &'a S,
    pub(crate) endpoint: &'a EndpointName,
    pub(crate) owner: &'a ConsumerId,
    pub(crate) expiration: Duration,
}

impl<S: OwnershipStore + ?Sized> HeartbeatContext<'_, S> {
    fn key(&self, bucket: BucketId) -> BucketKey {
        BucketKey::new(self.endpoint.clone(), bucket)
    }
}

/// Execute the store calls of `plan`.
///
/// Store failures are logged and counted; they never abort the cycle.
pub(crate) async fn run_heartbeat_cycle<S: OwnershipStore + ?Sized>(
    ctx: HeartbeatContext<'_, S>,
    plan: HeartbeatPlan,
) -> HeartbeatReport {
    let now = Timestamp::now();
    let mut report = HeartbeatReport::default();

    let beats = plan
        .renew
        .iter()
        .map(|&(bucket, position)| (bucket, Some(position)))
        .chain(plan.ping.iter().map(|&bucket| (bucket, None)));

    for (bucket, position) in beats {
        debug!(%bucket, position = ?position, "heartbeating bucket");
        match ctx
            .store
            .heartbeat(&ctx.key(bucket), ctx.owner, now, position)
            .await
        {
            OwnershipOutcome::Owned => {}
            OwnershipOutcome::Conflict => report.lost.push(bucket),
            OwnershipOutcome::StoreUnavailable(operation) => {
                warn!(%bucket, %operation, "heartbeat failed, retrying next cycle");
                report.unavailable += 1;
            }
        }
    }

    if let Some(adoption) = plan.adoption {
        debug!(bucket = %adoption.bucket, cursor = ?adoption.cursor, "heartbeating adopted bucket");
        match ctx
            .store
            .heartbeat(&ctx.key(adoption.bucket), ctx.owner, now, adoption.cursor)
            .await
        {
            OwnershipOutcome::Owned => {}
            OwnershipOutcome::Conflict => report.adoption_lost = Some(adoption.id),
            OwnershipOutcome::StoreUnavailable(operation) => {
                warn!(bucket = %adoption.bucket, %operation, "adoption heartbeat failed");
                report.unavailable += 1;
            }
        }
    }

    for bucket in plan.candidates {
        match ctx.store.last_heartbeat(&ctx.key(bucket)).await {
            Ok(Some(last)) => {
                let age = now.elapsed_since(last);
                if age > ctx.expiration {
                    debug!(%bucket, last_heartbeat = %last, ?age, "lease expired");
                    report.orphan = Some(Orphan {
                        bucket,
                        observed_heartbeat: last,
                    });
                    break;
                }
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%bucket, %error, "could not read last heartbeat");
                report.unavailable += 1;
            }
        }
    }

    report
}
