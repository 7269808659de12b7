//! Error types for configuration and for a running subscriber.
//!
//! Ownership conflicts are not errors: the store reports them through
//! `OwnershipOutcome` and the subscriber reconciles its local claims. The
//! variants here are the conditions a caller has to act on.

use bucketcore_types::DropReason;
use thiserror::Error;

/// A configuration option is missing or out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option was not supplied.
    #[error("missing required option {option}")]
    Missing {
        /// Settings name of the option.
        option: &'static str,
    },

    /// An option failed to parse or violated its bounds.
    #[error("invalid value for option {option}: {reason}")]
    Invalid {
        /// Settings name of the option.
        option: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(option: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            option,
            reason: reason.to_string(),
        }
    }
}

/// Why a subscriber stopped running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriberError {
    /// The dispatcher signalled a terminal cancellation.
    #[error("subscription cancelled by the dispatcher")]
    Cancelled,

    /// The primary subscription dropped for a reason other than a requested stop.
    #[error("subscription dropped: {0}")]
    Dropped(DropReason),

    /// The subscriber had already stopped when the request arrived.
    #[error("subscriber already stopped")]
    AlreadyStopped,

    /// A task owned by the subscriber panicked.
    #[error("subscriber task panicked: {0}")]
    TaskPanicked(String),
}
