//! A dispatcher that remembers everything it was asked to do.
//!
//! `RecordingDispatcher` is `Clone`; every clone shares the same record, so a
//! test keeps one handle while the subscriber owns another.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bucketcore_types::{DispatchError, DispatchedEvent, Dispatcher, LogPosition, StreamId};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<DispatchedEvent>,
    pauses: Vec<bool>,
    fail_at: Option<LogPosition>,
    cancel_at: Option<LogPosition>,
    delay: Option<Duration>,
}

/// Records dispatched events and pause requests.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingDispatcher {
    /// A dispatcher that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` over every dispatch, like a handler doing real work.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.recorded.lock().delay = Some(delay);
        self
    }

    /// Fail the dispatch of the event at `position` (and only that one).
    pub fn fail_at(&self, position: LogPosition) {
        self.recorded.lock().fail_at = Some(position);
    }

    /// Cancel the subscription when the event at `position` is dispatched.
    pub fn cancel_at(&self, position: LogPosition) {
        self.recorded.lock().cancel_at = Some(position);
    }

    /// Every event handed over, in dispatch order, duplicates included.
    pub fn events(&self) -> Vec<DispatchedEvent> {
        self.recorded.lock().events.clone()
    }

    /// Positions of every event handed over, in dispatch order.
    pub fn positions(&self) -> Vec<LogPosition> {
        self.recorded
            .lock()
            .events
            .iter()
            .map(|event| event.position)
            .collect()
    }

    /// The positions handed over at least once.
    ///
    /// Dispatch is idempotent per position, so this is the effective outcome
    /// of a run that may have seen duplicates around an ownership hand-off.
    pub fn distinct_positions(&self) -> BTreeSet<LogPosition> {
        self.positions().into_iter().collect()
    }

    /// Positions dispatched for events of `stream_id`.
    pub fn positions_for(&self, stream_id: &StreamId) -> Vec<LogPosition> {
        self.recorded
            .lock()
            .events
            .iter()
            .filter(|event| &event.descriptor.stream_id == stream_id)
            .map(|event| event.position)
            .collect()
    }

    /// Number of dispatch calls that succeeded or failed.
    pub fn dispatch_count(&self) -> usize {
        self.recorded.lock().events.len()
    }

    /// Every `pause` call, in order.
    pub fn pause_history(&self) -> Vec<bool> {
        self.recorded.lock().pauses.clone()
    }

    /// Whether the last `pause` call paused.
    pub fn is_paused(&self) -> bool {
        self.recorded.lock().pauses.last().copied().unwrap_or(false)
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(&self, event: DispatchedEvent) -> Result<(), DispatchError> {
        let delay = self.recorded.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut recorded = self.recorded.lock();
        let position = event.position;
        recorded.events.push(event);

        if recorded.cancel_at == Some(position) {
            return Err(DispatchError::Cancelled);
        }
        if recorded.fail_at == Some(position) {
            return Err(DispatchError::Failed(format!(
                "injected failure at {position}"
            )));
        }
        Ok(())
    }

    async fn pause(&self, paused: bool) {
        self.recorded.lock().pauses.push(paused);
    }
}

/// Poll `check` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition was met.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
