//! Taking over a bucket whose owner stopped renewing its lease.
//!
//! An [`AdoptionJob`] runs as its own task. It transfers ownership with a
//! compare-and-set on the stale heartbeat, replays the bucket from its last
//! recorded position on a secondary reader, and reports every step to the
//! orchestration loop, which alone decides what the replayed events mean.

use std::sync::Arc;

use bucketcore_types::{
    BatchSize, BucketKey, ConsumerId, EventLog, Operation, OwnershipOutcome, OwnershipStore,
    ReaderSignal, StartPosition, Timestamp,
};
use tracing::{debug, warn};

use crate::assignment::BucketAssigner;
use crate::claims::AdoptionId;
use crate::inbox::{AdoptionReports, AdoptionSignal};
use crate::reader::LiveEventReader;

pub(crate) struct AdoptionJob<S: ?Sized, L: ?Sized> {
    pub(crate) id: AdoptionId,
    pub(crate) key: BucketKey,
    pub(crate) owner: ConsumerId,
    pub(crate) observed_heartbeat: Timestamp,
    pub(crate) store: Arc<S>,
    pub(crate) log: Arc<L>,
    pub(crate) assigner: BucketAssigner,
    pub(crate) read_size: BatchSize,
}

impl<S, L> AdoptionJob<S, L>
where
    S: OwnershipStore + ?Sized,
    L: EventLog + ?Sized,
{
    /// Run the adoption to completion, reporting through `reports`.
    pub(crate) async fn run(self, reports: AdoptionReports) {
        let id = self.id;
        let report = |signal| {
            let reports = reports.clone();
            async move { reports.send((id, signal)).await.is_ok() }
        };

        let outcome = self
            .store
            .adopt(&self.key, &self.owner, self.observed_heartbeat, Timestamp::now())
            .await;
        if outcome != OwnershipOutcome::Owned {
            let _ = report(AdoptionSignal::NotAdopted(outcome)).await;
            return;
        }

        let start = match self.store.last_position(&self.key).await {
            Ok(position) => StartPosition::from(position),
            Err(error) => {
                warn!(bucket = %self.key.bucket, %error, "could not read adopted bucket position");
                let _ = report(AdoptionSignal::NotAdopted(
                    OwnershipOutcome::StoreUnavailable(Operation::LastPosition),
                ))
                .await;
                return;
            }
        };

        if !report(AdoptionSignal::Started(start)).await {
            return;
        }

        let mut reader = LiveEventReader::open(self.log.as_ref(), start, self.read_size);
        while let Some(signal) = reader.next_signal().await {
            let signal = match signal {
                ReaderSignal::Event(entry) => {
                    if self.assigner.assign(&entry.stream_id) != self.key.bucket {
                        continue;
                    }
                    match entry.decode() {
                        Ok(event) => AdoptionSignal::Replayed(event),
                        Err(reason) => {
                            debug!(position = %entry.position, %reason, "skipping replayed entry");
                            continue;
                        }
                    }
                }
                ReaderSignal::CaughtUp => {
                    let _ = reader.stop();
                    AdoptionSignal::CaughtUp
                }
                ReaderSignal::Dropped(reason) if reason.is_user_initiated() => return,
                ReaderSignal::Dropped(reason) => AdoptionSignal::Dropped(reason),
            };

            if !report(signal).await {
                return;
            }
        }
    }
}
