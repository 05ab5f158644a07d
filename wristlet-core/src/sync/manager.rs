//! Sync Manager Seam
//!
//! The collaborator that performs the actual synchronization work (fetching
//! and applying commits). The queue consumes it only through this trait and
//! its sync-outcome events.

use thiserror::Error;

use crate::device::DeviceError;
use crate::events::{EventHandler, EventKind, SubscriptionToken};

use super::request::SyncRequest;

/// Errors surfaced by sync coordination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("no user context available to sync with")]
    MissingUser,

    #[error("a sync is already running")]
    AlreadySyncing,

    #[error("sync manager failure: {0}")]
    Manager(String),

    #[error("device failure: {0}")]
    Device(#[from] DeviceError),
}

/// Interface to the component performing synchronization work.
///
/// Implementations emit `SyncCompleted`/`SyncFailed` events through the
/// bindings handed out by [`bind_to_sync_event`](SyncManager::bind_to_sync_event);
/// the queue treats those events as authoritative for the request in
/// progress.
pub trait SyncManager: Send + Sync {
    /// True while a sync run is active.
    fn is_syncing(&self) -> bool;

    /// Starts a sync scoped to the given request's user and device.
    ///
    /// A synchronous error means the sync never started.
    fn sync_with(&self, request: &SyncRequest) -> Result<(), SyncError>;

    /// Starts a sync for the manager's last known user.
    ///
    /// Returns the failure when the sync could not be started.
    fn sync_with_last_user(&self) -> Option<SyncError>;

    /// Binds a handler to one of the manager's sync-outcome events.
    ///
    /// Returns `None` when the manager does not emit the given kind.
    fn bind_to_sync_event(
        &self,
        kind: EventKind,
        handler: EventHandler,
    ) -> Option<SubscriptionToken>;

    /// Releases a binding created by `bind_to_sync_event`.
    fn remove_sync_binding(&self, token: SubscriptionToken);
}
