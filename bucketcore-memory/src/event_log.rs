use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bucketcore_types::{
    BatchSize, DropReason, EventLog, LogEntry, LogPosition, NewEntry, ReaderSignal, SignalStream,
    StartPosition,
};
use parking_lot::RwLock;
use tokio::sync::watch;

/// Thread-safe in-memory event log for testing
///
/// Positions are assigned densely from zero in append order. Subscriptions
/// replay history in batches, signal `CaughtUp` once they reach the tail and
/// then follow appends live until they are dropped or severed.
#[derive(Clone)]
pub struct InMemoryEventLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    entries: RwLock<Vec<LogEntry>>,
    head: watch::Sender<LogHead>,
    opened: AtomicUsize,
}

#[derive(Debug, Clone)]
struct LogHead {
    len: usize,
    // Bumped by every sever; subscriptions opened under an older generation end
    generation: u64,
    severed_with: Option<DropReason>,
}

impl InMemoryEventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        let (head, _) = watch::channel(LogHead {
            len: 0,
            generation: 0,
            severed_with: None,
        });

        Self {
            inner: Arc::new(LogInner {
                entries: RwLock::new(Vec::new()),
                head,
                opened: AtomicUsize::new(0),
            }),
        }
    }

    /// Append one entry and return its position.
    pub fn append(&self, entry: NewEntry) -> LogPosition {
        let mut positions = self.append_all(std::iter::once(entry));
        positions.remove(0)
    }

    /// Append entries in order and return their positions.
    pub fn append_all(&self, entries: impl IntoIterator<Item = NewEntry>) -> Vec<LogPosition> {
        let (positions, len) = {
            let mut log = self.inner.entries.write();
            let positions = entries
                .into_iter()
                .map(|entry| {
                    let position = LogPosition::new(log.len() as u64);
                    log.push(LogEntry::recorded(position, entry));
                    position
                })
                .collect::<Vec<_>>();
            (positions, log.len())
        };

        self.inner.head.send_modify(|head| head.len = len);
        positions
    }

    /// Position of the most recently appended entry.
    pub fn head_position(&self) -> Option<LogPosition> {
        self.inner.entries.read().last().map(|entry| entry.position)
    }

    /// Number of subscriptions opened so far.
    pub fn subscriptions_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// End every open subscription with `Dropped(reason)`.
    ///
    /// Subscriptions opened afterwards are unaffected.
    pub fn sever_subscriptions(&self, reason: DropReason) {
        tracing::debug!(%reason, "severing in-memory subscriptions");
        self.inner.head.send_modify(|head| {
            head.generation += 1;
            head.severed_with = Some(reason);
        });
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn subscribe(&self, start: StartPosition, batch_size: BatchSize) -> SignalStream {
        let _ = self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let head = self.inner.head.subscribe();
        let generation = head.borrow().generation;
        let next_index = match start {
            StartPosition::Beginning => 0,
            StartPosition::After(position) => {
                usize::try_from(position.into_inner()).map_or(usize::MAX, |index| index + 1)
            }
        };

        let cursor = Cursor {
            inner: Arc::clone(&self.inner),
            head,
            generation,
            next_index,
            batch_size: batch_size.into_inner(),
            buffer: VecDeque::new(),
            caught_up: false,
            finished: false,
        };

        Box::pin(futures::stream::unfold(cursor, |mut cursor| async move {
            let signal = cursor.next_signal().await?;
            Some((signal, cursor))
        }))
    }
}

struct Cursor {
    inner: Arc<LogInner>,
    head: watch::Receiver<LogHead>,
    generation: u64,
    next_index: usize,
    batch_size: usize,
    buffer: VecDeque<LogEntry>,
    caught_up: bool,
    finished: bool,
}

impl Cursor {
    async fn next_signal(&mut self) -> Option<ReaderSignal> {
        loop {
            if self.finished {
                return None;
            }

            let head = self.head.borrow_and_update().clone();
            if head.generation != self.generation {
                self.finished = true;
                let reason = head.severed_with.unwrap_or(DropReason::ConnectionClosed);
                return Some(ReaderSignal::Dropped(reason));
            }

            if let Some(entry) = self.buffer.pop_front() {
                return Some(ReaderSignal::Event(entry));
            }

            if self.refill() {
                continue;
            }

            if !self.caught_up {
                self.caught_up = true;
                return Some(ReaderSignal::CaughtUp);
            }

            if self.head.changed().await.is_err() {
                self.finished = true;
                return Some(ReaderSignal::Dropped(DropReason::ConnectionClosed));
            }
        }
    }

    // Reads the next batch; control entries are consumed but never buffered
    fn refill(&mut self) -> bool {
        let log = self.inner.entries.read();
        if self.next_index >= log.len() {
            return false;
        }

        let end = log.len().min(self.next_index.saturating_add(self.batch_size));
        self.buffer.extend(
            log[self.next_index..end]
                .iter()
                .filter(|entry| !entry.stream_id.is_control())
                .cloned(),
        );
        self.next_index = end;
        true
    }
}
