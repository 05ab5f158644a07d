//! Sync Request Queue
//!
//! FIFO coordinator for synchronization requests. At most one request is in
//! progress at any time and it is always the head of the queue; every
//! enqueued request eventually reaches `Done` and fires its completion
//! exactly once. Completion of the head fans out to older queued requests
//! already covered by the finished sync.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventKind, SubscriptionToken, WristletEvent};

use super::manager::{SyncError, SyncManager};
use super::request::{RequestState, SyncOutcome, SyncRequest};

/// Default grace period before starting the next queued request.
pub const DEFAULT_ADVANCE_DELAY: Duration = Duration::from_millis(100);

/// Configuration for the sync request queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Grace period between completing one request and starting the next.
    ///
    /// Lets a direct completion racing the outcome event win first; not
    /// load-bearing for correctness. Zero advances inline.
    pub advance_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            advance_delay: DEFAULT_ADVANCE_DELAY,
        }
    }
}

/// Completion callback attached to a queued request.
pub type SyncCompletion = Box<dyn FnOnce(SyncOutcome, Option<SyncError>) + Send>;

struct QueuedRequest {
    request: SyncRequest,
    completion: Option<SyncCompletion>,
}

struct QueueInner {
    requests: VecDeque<QueuedRequest>,
    advance_at: Option<Instant>,
    config: QueueConfig,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    manager: Arc<dyn SyncManager>,
}

/// FIFO coordinator for synchronization requests.
///
/// One long-lived instance per process, constructed with the sync manager
/// it drives and owned by the application's composition root. Sync-outcome
/// bindings are established at construction and released on drop.
///
/// # Example
///
/// ```ignore
/// use wristlet_core::sync::{MockSyncManager, SyncRequest, SyncRequestQueue};
/// use std::sync::Arc;
///
/// let manager = Arc::new(MockSyncManager::new());
/// let queue = SyncRequestQueue::new(manager.clone());
///
/// queue.add(SyncRequest::for_user_device("user-1", "device-1"), |outcome, error| {
///     // fires exactly once
/// });
/// ```
pub struct SyncRequestQueue {
    shared: Arc<QueueShared>,
    bindings: Vec<SubscriptionToken>,
}

impl SyncRequestQueue {
    /// Creates a queue with the default advance delay.
    pub fn new(manager: Arc<dyn SyncManager>) -> Self {
        Self::with_config(manager, QueueConfig::default())
    }

    /// Creates a queue with an explicit configuration.
    pub fn with_config(manager: Arc<dyn SyncManager>, config: QueueConfig) -> Self {
        let shared = Arc::new(QueueShared {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                advance_at: None,
                config,
            }),
            manager: Arc::clone(&manager),
        });

        let mut bindings = Vec::new();
        let on_completed = Arc::clone(&shared);
        if let Some(token) = manager.bind_to_sync_event(
            EventKind::SyncCompleted,
            Arc::new(move |_: &WristletEvent| {
                QueueShared::on_sync_event(&on_completed, SyncOutcome::Completed, None);
            }),
        ) {
            bindings.push(token);
        }
        let on_failed = Arc::clone(&shared);
        if let Some(token) = manager.bind_to_sync_event(
            EventKind::SyncFailed,
            Arc::new(move |event: &WristletEvent| {
                QueueShared::on_sync_event(&on_failed, SyncOutcome::Failed, event.sync_error());
            }),
        ) {
            bindings.push(token);
        }

        SyncRequestQueue { shared, bindings }
    }

    /// Appends a request; starts it immediately when the queue is idle.
    ///
    /// The completion fires exactly once, on the covering sync's outcome or
    /// on a failure to start.
    pub fn add<F>(&self, request: SyncRequest, completion: F)
    where
        F: FnOnce(SyncOutcome, Option<SyncError>) + Send + 'static,
    {
        QueueShared::add(&self.shared, request, Box::new(completion));
    }

    /// Number of requests currently queued (including the in-progress head).
    pub fn len(&self) -> usize {
        self.shared.lock().requests.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.shared.lock().requests.is_empty()
    }

    /// State of the request at the head of the queue, if any.
    pub fn head_state(&self) -> Option<RequestState> {
        self.shared
            .lock()
            .requests
            .front()
            .map(|queued| queued.request.state())
    }

    /// Snapshot of the queued requests, head first.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.shared
            .lock()
            .requests
            .iter()
            .map(|queued| queued.request.clone())
            .collect()
    }

    /// Drives the delayed advance; the host calls this from its scheduling
    /// loop.
    pub fn poll(&self) {
        QueueShared::poll_at(&self.shared, Instant::now());
    }

    /// Poll against an explicit clock reading (for deterministic tests).
    pub fn poll_at(&self, now: Instant) {
        QueueShared::poll_at(&self.shared, now);
    }
}

impl Drop for SyncRequestQueue {
    fn drop(&mut self) {
        for token in self.bindings.drain(..) {
            self.shared.manager.remove_sync_binding(token);
        }
    }
}

impl QueueShared {
    fn add(shared: &Arc<Self>, request: SyncRequest, completion: SyncCompletion) {
        let start_now = {
            let mut inner = shared.lock();
            debug!(request_id = %request.id(), user = ?request.user_id(), "sync request queued");
            inner.requests.push_back(QueuedRequest {
                request,
                completion: Some(completion),
            });
            inner.requests.len() == 1 && !shared.manager.is_syncing()
        };
        if start_now {
            Self::try_start_head(shared);
        }
    }

    /// Attempts to start the head request; a synchronous failure completes
    /// it immediately and moves on to the next one.
    fn try_start_head(shared: &Arc<Self>) {
        let to_sync = {
            let mut inner = shared.lock();
            inner.advance_at = None;
            match inner.requests.front_mut() {
                Some(head) if head.request.state() == RequestState::Pending => {
                    head.request.begin(Instant::now());
                    Some(head.request.clone())
                }
                _ => None,
            }
        };
        let request = match to_sync {
            Some(request) => request,
            None => return,
        };

        info!(request_id = %request.id(), user = ?request.user_id(), "sync starting");
        // The manager is called outside the queue lock; a synchronous error
        // is an immediate failure of this request.
        let result = match request.user_id() {
            Some(_) => shared.manager.sync_with(&request),
            None => match shared.manager.sync_with_last_user() {
                Some(error) => Err(error),
                None => Ok(()),
            },
        };
        if let Err(error) = result {
            warn!(request_id = %request.id(), error = %error, "sync failed to start");
            Self::fail_started_head(shared, request.id(), error);
        }
    }

    /// Completes the head it just started after the manager refused it.
    fn fail_started_head(shared: &Arc<Self>, id: Uuid, error: SyncError) {
        let mut completions = Vec::new();
        let advance_inline = {
            let mut inner = shared.lock();
            let matches_head = matches!(
                inner.requests.front(),
                Some(head) if head.request.id() == id
                    && head.request.state() == RequestState::InProgress
            );
            if !matches_head {
                // An outcome event got here first; nothing left to fail.
                return;
            }
            Self::finish_head_locked(
                &mut inner,
                SyncOutcome::Failed,
                Some(error),
                &mut completions,
            );
            Self::schedule_advance_locked(&mut inner)
        };
        Self::fire(completions);
        if advance_inline {
            Self::try_start_head(shared);
        }
    }

    /// Handles a sync-outcome event from the manager.
    fn on_sync_event(shared: &Arc<Self>, outcome: SyncOutcome, error: Option<SyncError>) {
        let mut completions = Vec::new();
        let advance_inline = {
            let mut inner = shared.lock();
            let head_in_progress = matches!(
                inner.requests.front(),
                Some(head) if head.request.state() == RequestState::InProgress
            );
            if head_in_progress {
                // The event is authoritative for the request in progress.
                Self::finish_head_locked(&mut inner, outcome, error, &mut completions);
            } else {
                // Spurious or duplicate event: just move the queue along.
                debug!("sync event with no in-progress head");
            }
            Self::schedule_advance_locked(&mut inner)
        };
        Self::fire(completions);
        if advance_inline {
            Self::try_start_head(shared);
        }
    }

    /// Pops the head, then fans its outcome out to older queued requests
    /// the finished sync already covers.
    ///
    /// Caller guarantees the head exists and is in progress.
    fn finish_head_locked(
        inner: &mut QueueInner,
        outcome: SyncOutcome,
        error: Option<SyncError>,
        completions: &mut Vec<(SyncCompletion, SyncOutcome, Option<SyncError>)>,
    ) {
        let mut head = match inner.requests.pop_front() {
            Some(head) => head,
            None => return,
        };
        let sync_start = head.request.sync_start();
        head.request.finish();
        info!(request_id = %head.request.id(), outcome = ?outcome, "sync request completed");
        if let Some(completion) = head.completion.take() {
            completions.push((completion, outcome, error.clone()));
        }

        // A request made before this sync started, for the same user and
        // device, is already covered by it.
        let started = match sync_start {
            Some(started) => started,
            None => return,
        };
        while let Some(next) = inner.requests.front() {
            let stale = next.request.requested_at() < started
                && next.request.is_same_user_and_device(&head.request);
            if !stale {
                break;
            }
            let mut stale_request = match inner.requests.pop_front() {
                Some(queued) => queued,
                None => break,
            };
            stale_request.request.finish();
            debug!(request_id = %stale_request.request.id(), "stale request coalesced");
            if let Some(completion) = stale_request.completion.take() {
                completions.push((completion, outcome, error.clone()));
            }
        }
    }

    /// Schedules a start attempt for the new head. Returns true when the
    /// caller should start it inline (zero delay).
    fn schedule_advance_locked(inner: &mut QueueInner) -> bool {
        if inner.requests.is_empty() {
            inner.advance_at = None;
            return false;
        }
        if inner.config.advance_delay.is_zero() {
            return true;
        }
        inner.advance_at = Some(Instant::now() + inner.config.advance_delay);
        false
    }

    fn poll_at(shared: &Arc<Self>, now: Instant) {
        let due = {
            let mut inner = shared.lock();
            match inner.advance_at {
                Some(at) if at <= now => {
                    inner.advance_at = None;
                    true
                }
                _ => false,
            }
        };
        if due {
            Self::try_start_head(shared);
        }
    }

    /// Invokes completions after the queue lock has been released, so a
    /// callback may re-enter the queue.
    fn fire(completions: Vec<(SyncCompletion, SyncOutcome, Option<SyncError>)>) {
        for (completion, outcome, error) in completions {
            completion(outcome, error);
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// INLINE_TEST_REQUIRED: Tests private advance scheduling over QueueInner
#[cfg(test)]
mod tests {
    use super::*;

    fn inner_with(config: QueueConfig) -> QueueInner {
        QueueInner {
            requests: VecDeque::new(),
            advance_at: None,
            config,
        }
    }

    fn queued() -> QueuedRequest {
        QueuedRequest {
            request: SyncRequest::new(),
            completion: Some(Box::new(|_, _| {})),
        }
    }

    #[test]
    fn test_schedule_advance_empty_queue_clears_deadline() {
        let mut inner = inner_with(QueueConfig::default());
        inner.advance_at = Some(Instant::now());

        assert!(!QueueShared::schedule_advance_locked(&mut inner));
        assert!(inner.advance_at.is_none());
    }

    #[test]
    fn test_schedule_advance_zero_delay_is_inline() {
        let mut inner = inner_with(QueueConfig {
            advance_delay: Duration::ZERO,
        });
        inner.requests.push_back(queued());

        assert!(QueueShared::schedule_advance_locked(&mut inner));
        assert!(inner.advance_at.is_none());
    }

    #[test]
    fn test_schedule_advance_nonzero_delay_sets_deadline() {
        let mut inner = inner_with(QueueConfig {
            advance_delay: Duration::from_millis(100),
        });
        inner.requests.push_back(queued());

        assert!(!QueueShared::schedule_advance_locked(&mut inner));
        assert!(inner.advance_at.is_some());
    }
}
