//! Ordered, stoppable view over an `EventLog` subscription.

use bucketcore_types::{BatchSize, DropReason, EventLog, ReaderSignal, SignalStream, StartPosition};
use futures::StreamExt;

/// A tailing subscription that can be stopped any number of times.
///
/// The underlying stream is released on the first [`stop`](Self::stop). A
/// stream that ends without announcing a drop is reported as
/// `Dropped(ConnectionClosed)`, so callers always learn why delivery ended.
pub struct LiveEventReader {
    stream: Option<SignalStream>,
}

impl LiveEventReader {
    /// Subscribe to `log` from `start`.
    pub fn open<L: EventLog + ?Sized>(log: &L, start: StartPosition, batch_size: BatchSize) -> Self {
        Self {
            stream: Some(log.subscribe(start, batch_size)),
        }
    }

    /// The next signal, or `None` once the reader is stopped or has dropped.
    ///
    /// Cancel safe: a signal is never lost when the returned future is dropped.
    pub async fn next_signal(&mut self) -> Option<ReaderSignal> {
        let stream = self.stream.as_mut()?;
        let signal = stream
            .next()
            .await
            .unwrap_or(ReaderSignal::Dropped(DropReason::ConnectionClosed));

        if matches!(signal, ReaderSignal::Dropped(_)) {
            self.stream = None;
        }
        Some(signal)
    }

    /// Stop delivery. Returns `false` when the reader had already stopped.
    pub fn stop(&mut self) -> bool {
        self.stream.take().is_some()
    }

    /// Whether delivery has ended.
    pub const fn is_stopped(&self) -> bool {
        self.stream.is_none()
    }
}

impl std::fmt::Debug for LiveEventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEventReader")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
