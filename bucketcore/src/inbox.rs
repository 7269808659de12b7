//! Messages delivered into the orchestration loop.
//!
//! Handle commands and adoption progress arrive on separate channels. The
//! heartbeat and coverage timers live inside the loop itself, so neither
//! channel filling up can hold back a lease renewal.

use bucketcore_types::{DispatchedEvent, DropReason, OwnershipOutcome, StartPosition};
use tokio::sync::{mpsc, oneshot};

use crate::claims::AdoptionId;
use crate::subscriber::SubscriberStatus;

/// Capacity of the handle's command channel.
pub(crate) const INBOX_CAPACITY: usize = 16;

/// Capacity of the adoption progress channel.
pub(crate) const ADOPTION_CAPACITY: usize = 64;

pub(crate) type Inbox = mpsc::Sender<Command>;

/// Sending side of the adoption progress channel.
pub(crate) type AdoptionReports = mpsc::Sender<(AdoptionId, AdoptionSignal)>;

#[derive(Debug)]
pub(crate) enum Command {
    Status(oneshot::Sender<SubscriberStatus>),
    Shutdown,
}

/// Progress of an adoption, reported by its catch-up task.
#[derive(Debug)]
pub(crate) enum AdoptionSignal {
    /// Ownership was transferred; the catch-up reader opened at this position.
    Started(StartPosition),
    /// A data-bearing event of the adopted bucket was replayed.
    Replayed(DispatchedEvent),
    /// The catch-up reader reached the live tail and has been stopped.
    CaughtUp,
    /// The catch-up reader dropped for a reason other than a requested stop.
    Dropped(DropReason),
    /// The store did not transfer ownership.
    NotAdopted(OwnershipOutcome),
}
