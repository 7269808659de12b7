//! Testing utilities for BucketCore adapters and subscribers.
//!
//! - [`contract`]: reusable behavioral suites any `OwnershipStore` or
//!   `EventLog` implementation must pass
//! - [`chaos`]: an ownership store wrapper injecting outages, conflicts and latency
//! - [`recording`]: a dispatcher that records what it was handed and can be
//!   told to fail or cancel at a given position

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod contract;
pub mod recording;

pub use chaos::{ChaosConfig, ChaosOwnershipStore, ChaosOwnershipStoreExt, Probability};
pub use recording::{eventually, RecordingDispatcher};
