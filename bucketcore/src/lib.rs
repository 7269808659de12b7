//! Competing-consumer bucket ownership for event-sourced systems.
//!
//! Several instances of one endpoint tail the same ordered event log. Streams
//! are partitioned into a fixed number of buckets, and each bucket is owned by
//! at most one instance at a time through a shared [`OwnershipStore`]. Every
//! instance sees every event; only the owner of an event's bucket dispatches it.
//!
//! # Overview
//!
//! - [`CompetingSubscriber`]: routes events, claims buckets, heartbeats leases
//!   and adopts buckets whose owner went quiet
//! - [`BucketAssigner`]: the stable stream-to-bucket mapping
//! - [`PauseMonitor`]: fleet-wide backpressure while some bucket has no owner
//! - [`CompetingConfig`]: settings, from a builder, a settings document or the environment
//!
//! # Example
//!
//! ```ignore
//! use bucketcore::{CompetingConfig, CompetingSubscriber};
//! use bucketcore_memory::{InMemoryEventLog, InMemoryOwnershipStore};
//!
//! let config = CompetingConfig::from_env()?;
//! let subscriber = CompetingSubscriber::new(
//!     config,
//!     InMemoryOwnershipStore::new(),
//!     InMemoryEventLog::new(),
//!     my_dispatcher,
//! )
//! .await;
//! let handle = subscriber.subscribe_to_all();
//! // ...
//! handle.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod adoption;
pub mod assignment;
mod claims;
pub mod config;
pub mod errors;
mod heartbeat;
mod inbox;
pub mod pause;
pub mod reader;
pub mod subscriber;
pub mod telemetry;

pub use assignment::BucketAssigner;
pub use config::{
    AdoptionReplay, BucketsHandled, BucketsHandledError, ClaimTimeoutMs, ClaimTimeoutMsError,
    CompetingConfig, CompetingConfigBuilder, CompetingSettings, ExpirationSeconds,
    ExpirationSecondsError, HeartbeatSeconds, HeartbeatSecondsError,
};
pub use errors::{ConfigError, SubscriberError};
pub use pause::{count_uncovered, PauseCommand, PauseMonitor};
pub use reader::LiveEventReader;
pub use subscriber::{CompetingSubscriber, DroppedCallback, SubscriberHandle, SubscriberStatus};

pub use bucketcore_types::{
    BatchSize, BucketCount, BucketId, BucketKey, ConsumerId, DispatchError, DispatchedEvent,
    Dispatcher, DropReason, EndpointName, EventDescriptor, EventLog, LogEntry, LogPosition,
    NewEntry, Operation, OwnershipOutcome, OwnershipRecord, OwnershipStore, OwnershipStoreError,
    ReaderSignal, StartPosition, StreamId, Timestamp,
};
