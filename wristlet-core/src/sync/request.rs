//! Sync Request Model
//!
//! A request to synchronize one user/device pair. Created by a caller,
//! owned exclusively by the queue once submitted.

use std::time::Instant;

use uuid::Uuid;

/// Outcome delivered to a request's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The covering sync finished successfully.
    Completed,
    /// The covering sync failed, or the request could not be started.
    Failed,
}

/// Lifecycle state of a queued sync request. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Queued, waiting for its turn.
    Pending,
    /// A sync is running on this request's behalf.
    InProgress,
    /// Terminal; the completion callback has fired.
    Done,
}

/// A single synchronization request.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    id: Uuid,
    requested_at: Instant,
    sync_start: Option<Instant>,
    state: RequestState,
    user_id: Option<String>,
    device_id: Option<String>,
}

impl SyncRequest {
    /// Creates a request with no explicit user/device scope.
    ///
    /// The queue will ask the sync manager to use its last known user.
    pub fn new() -> Self {
        SyncRequest {
            id: Uuid::new_v4(),
            requested_at: Instant::now(),
            sync_start: None,
            state: RequestState::Pending,
            user_id: None,
            device_id: None,
        }
    }

    /// Creates a request scoped to a user and device.
    pub fn for_user_device(user_id: &str, device_id: &str) -> Self {
        SyncRequest {
            user_id: Some(user_id.to_string()),
            device_id: Some(device_id.to_string()),
            ..SyncRequest::new()
        }
    }

    /// Unique id of this request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the request was created (not when it was enqueued).
    pub fn requested_at(&self) -> Instant {
        self.requested_at
    }

    /// When the sync covering this request started, once in progress.
    pub fn sync_start(&self) -> Option<Instant> {
        self.sync_start
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// The requesting user, if scoped.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The target device, if scoped.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// True when both requests name the same user and the same device.
    ///
    /// Absent identifiers never match.
    pub fn is_same_user_and_device(&self, other: &SyncRequest) -> bool {
        match (
            &self.user_id,
            &other.user_id,
            &self.device_id,
            &other.device_id,
        ) {
            (Some(user), Some(other_user), Some(device), Some(other_device)) => {
                user == other_user && device == other_device
            }
            _ => false,
        }
    }

    /// Marks the request in progress, recording its sync start time.
    pub(crate) fn begin(&mut self, now: Instant) {
        debug_assert_eq!(self.state, RequestState::Pending);
        self.state = RequestState::InProgress;
        self.sync_start = Some(now);
    }

    /// Marks the request done.
    pub(crate) fn finish(&mut self) {
        self.state = RequestState::Done;
    }
}

impl Default for SyncRequest {
    fn default() -> Self {
        SyncRequest::new()
    }
}
