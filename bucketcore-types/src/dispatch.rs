//! The application-side collaborator that executes event side effects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::log::{EventDescriptor, LogPosition};

/// A decoded, data-bearing event handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedEvent {
    /// Decoded event payload.
    pub payload: serde_json::Value,
    /// Metadata envelope.
    pub descriptor: EventDescriptor,
    /// Global position of the event.
    pub position: LogPosition,
}

/// Failure reported by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Terminal cancellation: the subscription must stop and the cancellation
    /// propagates to whoever is running the subscriber.
    #[error("dispatch cancelled the subscription")]
    Cancelled,
    /// The side effect failed; the subscription is dropped as faulted.
    #[error("dispatch failed: {0}")]
    Failed(String),
}

/// Executes application-level side effects and controls fleet-wide backpressure.
///
/// Events can reach the dispatcher more than once around an ownership
/// hand-off (a stale owner and its adopter may both see an event). Dispatch
/// must therefore be idempotent with respect to `DispatchedEvent::position`.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Execute the side effects of one event.
    async fn dispatch(&self, event: DispatchedEvent) -> Result<(), DispatchError>;

    /// Stop (`true`) or resume (`false`) accepting new work.
    async fn pause(&self, paused: bool);
}

#[async_trait]
impl<T: Dispatcher + ?Sized> Dispatcher for std::sync::Arc<T> {
    async fn dispatch(&self, event: DispatchedEvent) -> Result<(), DispatchError> {
        (**self).dispatch(event).await
    }

    async fn pause(&self, paused: bool) {
        (**self).pause(paused).await;
    }
}
