//! Fleet-wide backpressure when bucket coverage is incomplete.
//!
//! Every cycle counts the buckets without a fresh heartbeat. The first cycle
//! that finds any arms the monitor, a second consecutive one pauses the
//! dispatcher, and any cycle with full coverage disarms and resumes at once.

use std::time::Duration;

use bucketcore_types::{
    BucketCount, BucketKey, EndpointName, OwnershipStore, OwnershipStoreError, Timestamp,
};
use futures::future::join_all;

/// What the dispatcher should be told after a coverage cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCommand {
    /// Leave the dispatcher as it is.
    None,
    /// Stop accepting new work.
    Pause,
    /// Accept work again.
    Resume,
}

/// Two-phase debounce over consecutive coverage cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseMonitor {
    armed: bool,
}

impl PauseMonitor {
    /// A disarmed monitor.
    pub const fn new() -> Self {
        Self { armed: false }
    }

    /// Whether the previous cycle found uncovered buckets.
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed the number of uncovered buckets found by one cycle.
    pub fn observe(&mut self, uncovered: usize) -> PauseCommand {
        if uncovered == 0 {
            self.armed = false;
            return PauseCommand::Resume;
        }

        if self.armed {
            PauseCommand::Pause
        } else {
            self.armed = true;
            PauseCommand::None
        }
    }
}

/// Count the buckets of `endpoint` without a heartbeat younger than `expiration`.
///
/// All buckets are queried concurrently. Any failed query fails the whole
/// scan so that a partial view never trips or clears the monitor.
pub async fn count_uncovered<S: OwnershipStore + ?Sized>(
    store: &S,
    endpoint: &EndpointName,
    bucket_count: BucketCount,
    expiration: Duration,
) -> Result<usize, OwnershipStoreError> {
    let keys: Vec<BucketKey> = bucket_count
        .buckets()
        .map(|bucket| BucketKey::new(endpoint.clone(), bucket))
        .collect();
    let heartbeats = join_all(keys.iter().map(|key| store.last_heartbeat(key))).await;

    let now = Timestamp::now();
    let mut uncovered = 0;
    for heartbeat in heartbeats {
        let covered = heartbeat?.is_some_and(|last| now.elapsed_since(last) < expiration);
        if !covered {
            uncovered += 1;
        }
    }
    Ok(uncovered)
}
