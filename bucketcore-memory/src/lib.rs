//! In-memory adapters for the `BucketCore` competing consumer
//!
//! This crate provides in-memory implementations of the `OwnershipStore` and
//! `EventLog` contracts from `bucketcore-types`, useful for testing and for
//! single-process deployments where durability is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod event_log;
mod ownership;

pub use event_log::InMemoryEventLog;
pub use ownership::InMemoryOwnershipStore;
