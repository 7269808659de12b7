//! The ordered, append-only event log every competing instance tails.
//!
//! This module provides:
//! - `LogPosition` / `StartPosition`: global ordering and subscription origin
//! - `NewEntry` / `LogEntry`: what is appended and what is delivered
//! - `EventLog`: the subscription contract, yielding `ReaderSignal`s
//! - `EventDescriptor`: the metadata envelope every data-bearing entry carries

use std::collections::BTreeMap;
use std::pin::Pin;

use futures::Stream;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::DispatchedEvent;
use crate::time::Timestamp;

/// Global position of an entry in the ordered event log.
///
/// Positions are strictly increasing in delivery order; position 0 is the
/// first entry ever appended.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct LogPosition(u64);

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    /// Replay the whole log.
    Beginning,
    /// Replay entries strictly after the given position.
    After(LogPosition),
}

impl StartPosition {
    /// Whether an entry at `position` is delivered by a subscription starting here.
    pub fn admits(self, position: LogPosition) -> bool {
        match self {
            Self::Beginning => true,
            Self::After(after) => position > after,
        }
    }
}

impl From<Option<LogPosition>> for StartPosition {
    fn from(position: Option<LogPosition>) -> Self {
        position.map_or(Self::Beginning, Self::After)
    }
}

/// Identifier of an event stream within the log.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamId(String);

impl StreamId {
    /// Streams whose id starts with `$` hold log-internal control entries.
    pub fn is_control(&self) -> bool {
        self.as_ref().starts_with('$')
    }
}

/// Number of entries fetched per read while replaying history (default 100).
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    default = 100,
    derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BatchSize(usize);

/// Encoding of an entry's data and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    /// UTF-8 JSON documents.
    Json,
    /// Opaque bytes; never dispatched.
    Binary,
}

/// Metadata envelope written alongside every data-bearing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    /// Unique id of the event.
    pub event_id: Uuid,
    /// Stream the event was written to.
    pub stream_id: StreamId,
    /// Kind of entity owning the stream, when known.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Version of the event within its stream.
    #[serde(default)]
    pub version: u64,
    /// When the event was written.
    pub timestamp: Timestamp,
    /// Free-form headers carried with the event.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl EventDescriptor {
    /// A descriptor for a new event on `stream_id`.
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            stream_id,
            entity_type: None,
            version: 0,
            timestamp: Timestamp::now(),
            headers: BTreeMap::new(),
        }
    }

    /// Sets the stream version of the event.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Sets the entity type.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key.into(), value.into());
        self
    }
}

/// An entry to be appended; the log assigns its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Stream the entry belongs to.
    pub stream_id: StreamId,
    /// Event type name.
    pub event_type: String,
    /// Encoding of `data` and `metadata`.
    pub content_type: ContentType,
    /// Event payload.
    pub data: Vec<u8>,
    /// Encoded `EventDescriptor` (or arbitrary bytes for binary entries).
    pub metadata: Vec<u8>,
}

impl NewEntry {
    /// A JSON entry carrying `payload` and a fresh descriptor for `stream_id`.
    pub fn json<T: Serialize>(
        stream_id: StreamId,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let descriptor = EventDescriptor::new(stream_id.clone());
        Self::json_with_descriptor(event_type, payload, &descriptor)
    }

    /// A JSON entry with an explicit descriptor.
    pub fn json_with_descriptor<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
        descriptor: &EventDescriptor,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            stream_id: descriptor.stream_id.clone(),
            event_type: event_type.into(),
            content_type: ContentType::Json,
            data: serde_json::to_vec(payload)?,
            metadata: serde_json::to_vec(descriptor)?,
        })
    }

    /// An opaque binary entry.
    pub fn binary(stream_id: StreamId, event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            stream_id,
            event_type: event_type.into(),
            content_type: ContentType::Binary,
            data,
            metadata: Vec::new(),
        }
    }
}

/// An entry as delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Global position of the entry.
    pub position: LogPosition,
    /// Stream the entry belongs to.
    pub stream_id: StreamId,
    /// Event type name.
    pub event_type: String,
    /// Encoding of `data` and `metadata`.
    pub content_type: ContentType,
    /// Event payload.
    pub data: Vec<u8>,
    /// Encoded descriptor.
    pub metadata: Vec<u8>,
}

impl LogEntry {
    /// Places a new entry at `position`.
    pub fn recorded(position: LogPosition, entry: NewEntry) -> Self {
        Self {
            position,
            stream_id: entry.stream_id,
            event_type: entry.event_type,
            content_type: entry.content_type,
            data: entry.data,
            metadata: entry.metadata,
        }
    }

    /// Decodes the entry into something the dispatcher can execute.
    ///
    /// Entries that are not JSON, whose descriptor does not decode, or whose
    /// payload is empty or `null` are not data-bearing and are never dispatched.
    pub fn decode(&self) -> Result<DispatchedEvent, NotDataBearing> {
        if self.content_type != ContentType::Json {
            return Err(NotDataBearing::Binary);
        }

        let descriptor: EventDescriptor = serde_json::from_slice(&self.metadata)
            .map_err(|error| NotDataBearing::InvalidDescriptor(error.to_string()))?;

        let payload: serde_json::Value = serde_json::from_slice(&self.data)
            .map_err(|error| NotDataBearing::InvalidPayload(error.to_string()))?;

        if payload.is_null() {
            return Err(NotDataBearing::EmptyPayload);
        }

        Ok(DispatchedEvent {
            payload,
            descriptor,
            position: self.position,
        })
    }
}

/// Why an entry was discarded instead of routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotDataBearing {
    /// The entry is not JSON.
    #[error("entry is not json")]
    Binary,
    /// The metadata is not an `EventDescriptor`.
    #[error("descriptor did not decode: {0}")]
    InvalidDescriptor(String),
    /// The payload is not valid JSON.
    #[error("payload did not decode: {0}")]
    InvalidPayload(String),
    /// The payload decoded to `null`.
    #[error("payload is null")]
    EmptyPayload,
}

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    /// The subscriber asked to stop.
    #[error("user initiated")]
    UserInitiated,
    /// The connection to the log closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// The log reported an error.
    #[error("server error: {0}")]
    ServerError(String),
    /// The code handling delivered events failed.
    #[error("event handler fault: {0}")]
    HandlerFault(String),
}

impl DropReason {
    /// Whether the drop was requested rather than suffered.
    pub const fn is_user_initiated(&self) -> bool {
        matches!(self, Self::UserInitiated)
    }

    /// The underlying fault, for reasons that carry one.
    pub fn fault(&self) -> Option<&str> {
        match self {
            Self::ServerError(detail) | Self::HandlerFault(detail) => Some(detail),
            Self::UserInitiated | Self::ConnectionClosed => None,
        }
    }
}

/// One delivery from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderSignal {
    /// A data-bearing or undecoded entry, in log order.
    Event(LogEntry),
    /// Historical replay reached the live tail; emitted once.
    CaughtUp,
    /// The subscription terminated; nothing follows.
    Dropped(DropReason),
}

/// Boxed stream of signals returned by [`EventLog::subscribe`].
pub type SignalStream = Pin<Box<dyn Stream<Item = ReaderSignal> + Send>>;

/// A continuous, strictly ordered, tailing subscription source.
///
/// Implementations deliver every non-control entry with position admitted by
/// `start`, in increasing position order, followed by live entries as they are
/// appended. Dropping the returned stream ends the subscription.
pub trait EventLog: Send + Sync {
    /// Subscribe to the whole log from `start`, replaying history in batches of `batch_size`.
    fn subscribe(&self, start: StartPosition, batch_size: BatchSize) -> SignalStream;
}

impl<T: EventLog + ?Sized> EventLog for std::sync::Arc<T> {
    fn subscribe(&self, start: StartPosition, batch_size: BatchSize) -> SignalStream {
        (**self).subscribe(start, batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(id: &str) -> StreamId {
        StreamId::try_new(id).expect("valid stream id")
    }

    #[test]
    fn start_after_is_exclusive() {
        let start = StartPosition::After(LogPosition::new(5));
        assert!(!start.admits(LogPosition::new(5)));
        assert!(start.admits(LogPosition::new(6)));
    }

    #[test]
    fn missing_position_starts_from_beginning() {
        assert_eq!(StartPosition::from(None), StartPosition::Beginning);
    }

    #[test]
    fn dollar_streams_are_control_streams() {
        assert!(stream("$stats").is_control());
        assert!(!stream("order-1").is_control());
    }

    #[test]
    fn batch_size_rejects_zero() {
        assert!(BatchSize::try_new(0).is_err());
    }

    #[test]
    fn json_entry_decodes_into_dispatchable_event() {
        let entry = NewEntry::json(stream("order-1"), "OrderPlaced", &json!({"total": 10}))
            .expect("serializable payload");
        let recorded = LogEntry::recorded(LogPosition::new(3), entry);

        let event = recorded.decode().expect("data-bearing entry");

        assert_eq!(event.position, LogPosition::new(3));
        assert_eq!(event.payload, json!({"total": 10}));
        assert_eq!(event.descriptor.stream_id, stream("order-1"));
    }

    #[test]
    fn binary_entries_are_not_data_bearing() {
        let entry = NewEntry::binary(stream("blob-1"), "Blob", vec![1, 2, 3]);
        let recorded = LogEntry::recorded(LogPosition::new(0), entry);

        assert_eq!(recorded.decode(), Err(NotDataBearing::Binary));
    }

    #[test]
    fn null_payloads_are_not_data_bearing() {
        let entry = NewEntry::json(stream("order-1"), "Nothing", &serde_json::Value::Null)
            .expect("serializable payload");
        let recorded = LogEntry::recorded(LogPosition::new(0), entry);

        assert_eq!(recorded.decode(), Err(NotDataBearing::EmptyPayload));
    }

    #[test]
    fn garbage_metadata_is_not_data_bearing() {
        let mut entry = NewEntry::json(stream("order-1"), "OrderPlaced", &json!({"total": 1}))
            .expect("serializable payload");
        entry.metadata = b"not json".to_vec();
        let recorded = LogEntry::recorded(LogPosition::new(0), entry);

        assert!(matches!(
            recorded.decode(),
            Err(NotDataBearing::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn only_faulty_drops_carry_a_fault() {
        assert_eq!(DropReason::UserInitiated.fault(), None);
        assert_eq!(
            DropReason::ServerError("boom".to_string()).fault(),
            Some("boom")
        );
        assert!(DropReason::UserInitiated.is_user_initiated());
        assert!(!DropReason::ConnectionClosed.is_user_initiated());
    }
}
