//! Shared vocabulary types and contracts for the BucketCore competing consumer.
//!
//! This crate provides the foundational types shared between the `bucketcore`
//! orchestrator and the store/log adapters (`bucketcore-memory`,
//! `bucketcore-postgres`). Keeping them apart lets adapters depend on the
//! contracts without pulling in the runtime.
//!
//! # Overview
//!
//! This crate contains:
//! - Identifiers: `EndpointName`, `ConsumerId`, `BucketId`, `BucketCount`, `BucketKey`, `StreamId`
//! - Log types: `LogPosition`, `StartPosition`, `NewEntry`, `LogEntry`, `ReaderSignal`, `DropReason`
//! - Contracts: `OwnershipStore`, `EventLog`, `Dispatcher`
//! - Outcomes and errors: `OwnershipOutcome`, `Operation`, `OwnershipStoreError`, `DispatchError`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod dispatch;
mod log;
mod ownership;
mod time;

pub use bucket::{
    BucketCount, BucketCountError, BucketId, BucketKey, ConsumerId, ConsumerIdError, EndpointName,
    EndpointNameError,
};
pub use dispatch::{DispatchError, DispatchedEvent, Dispatcher};
pub use log::{
    BatchSize, BatchSizeError, ContentType, DropReason, EventDescriptor, EventLog, LogEntry,
    LogPosition, NewEntry, NotDataBearing, ReaderSignal, SignalStream, StartPosition, StreamId,
    StreamIdError,
};
pub use ownership::{
    Operation, OwnershipOutcome, OwnershipRecord, OwnershipStore, OwnershipStoreError,
};
pub use time::Timestamp;
