//! Mock Sync Manager
//!
//! Scriptable sync manager for tests and host integration work. Outcome
//! events travel through a real event channel, so queue bindings behave
//! exactly as they would against a production manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::{EventChannel, EventHandler, EventKind, SubscriptionToken, WristletEvent};

use super::manager::{SyncError, SyncManager};
use super::request::SyncRequest;

#[derive(Default)]
struct MockSyncState {
    syncing: bool,
    synced_requests: Vec<SyncRequest>,
    last_user_syncs: usize,
    sync_with_error: Option<SyncError>,
    last_user_error: Option<SyncError>,
}

/// Mock sync manager for testing.
pub struct MockSyncManager {
    events: Arc<EventChannel>,
    state: Mutex<MockSyncState>,
}

impl MockSyncManager {
    /// Creates an idle manager.
    pub fn new() -> Self {
        MockSyncManager {
            events: Arc::new(EventChannel::new()),
            state: Mutex::new(MockSyncState::default()),
        }
    }

    /// Forces the syncing flag without going through `sync_with`.
    pub fn set_syncing(&self, syncing: bool) {
        self.lock().syncing = syncing;
    }

    /// Makes every subsequent `sync_with` fail synchronously.
    pub fn set_sync_with_error(&self, error: Option<SyncError>) {
        self.lock().sync_with_error = error;
    }

    /// Makes every subsequent last-user sync fail synchronously.
    pub fn set_last_user_error(&self, error: Option<SyncError>) {
        self.lock().last_user_error = error;
    }

    /// Requests this manager was asked to sync.
    pub fn synced_requests(&self) -> Vec<SyncRequest> {
        self.lock().synced_requests.clone()
    }

    /// Number of last-user syncs started.
    pub fn last_user_sync_count(&self) -> usize {
        self.lock().last_user_syncs
    }

    /// Number of live sync-event bindings.
    pub fn binding_count(&self) -> usize {
        self.events.subscription_count()
    }

    /// Emits a successful sync outcome, as the real manager would.
    pub fn complete_sync(&self) {
        self.lock().syncing = false;
        self.events.publish(WristletEvent::SyncCompleted);
    }

    /// Emits a failed sync outcome, as the real manager would.
    pub fn fail_sync(&self, error: Option<SyncError>) {
        self.lock().syncing = false;
        self.events.publish(WristletEvent::SyncFailed { error });
    }

    fn lock(&self) -> MutexGuard<'_, MockSyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockSyncManager {
    fn default() -> Self {
        MockSyncManager::new()
    }
}

impl SyncManager for MockSyncManager {
    fn is_syncing(&self) -> bool {
        self.lock().syncing
    }

    fn sync_with(&self, request: &SyncRequest) -> Result<(), SyncError> {
        let mut state = self.lock();
        if let Some(error) = state.sync_with_error.clone() {
            return Err(error);
        }
        state.syncing = true;
        state.synced_requests.push(request.clone());
        Ok(())
    }

    fn sync_with_last_user(&self) -> Option<SyncError> {
        let mut state = self.lock();
        if let Some(error) = state.last_user_error.clone() {
            return Some(error);
        }
        state.syncing = true;
        state.last_user_syncs += 1;
        None
    }

    fn bind_to_sync_event(
        &self,
        kind: EventKind,
        handler: EventHandler,
    ) -> Option<SubscriptionToken> {
        match kind {
            EventKind::SyncCompleted | EventKind::SyncFailed => {
                Some(self.events.subscribe(kind, handler))
            }
            _ => None,
        }
    }

    fn remove_sync_binding(&self, token: SubscriptionToken) {
        self.events.unsubscribe(token);
    }
}
