//! Tests for sync::queue
//! FIFO ordering, stale-request coalescing, and exactly-once completion

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use wristlet_core::sync::*;

type Outcomes = Arc<Mutex<Vec<(SyncOutcome, Option<SyncError>)>>>;

fn zero_delay() -> QueueConfig {
    QueueConfig {
        advance_delay: Duration::ZERO,
    }
}

fn queue_with_manager(config: QueueConfig) -> (SyncRequestQueue, Arc<MockSyncManager>) {
    let manager = Arc::new(MockSyncManager::new());
    let queue = SyncRequestQueue::with_config(manager.clone(), config);
    (queue, manager)
}

fn capture(outcomes: &Outcomes) -> impl FnOnce(SyncOutcome, Option<SyncError>) + Send + 'static {
    let sink = outcomes.clone();
    move |outcome, error| sink.lock().unwrap().push((outcome, error))
}

/// Queue invariant: at most one request is in progress, and it is the head.
fn assert_head_exclusive(queue: &SyncRequestQueue) {
    let requests = queue.requests();
    let in_progress: Vec<usize> = requests
        .iter()
        .enumerate()
        .filter(|(_, request)| request.state() == RequestState::InProgress)
        .map(|(index, _)| index)
        .collect();
    assert!(in_progress.len() <= 1);
    if let Some(&index) = in_progress.first() {
        assert_eq!(index, 0);
    }
}

#[test]
fn test_idle_add_starts_immediately() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );

    assert_eq!(manager.synced_requests().len(), 1);
    assert_eq!(queue.head_state(), Some(RequestState::InProgress));
    assert!(manager.is_syncing());
    assert!(outcomes.lock().unwrap().is_empty());

    manager.complete_sync();

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(SyncOutcome::Completed, None)]
    );
    assert!(queue.is_empty());
}

#[test]
fn test_coalesces_stale_request_for_same_target() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    // Both requests exist before the sync starts; the running sync covers
    // whatever the second one would have observed.
    let first = SyncRequest::for_user_device("user-1", "device-1");
    let second = SyncRequest::for_user_device("user-1", "device-1");
    sleep(Duration::from_millis(5));

    queue.add(first, capture(&outcomes));
    queue.add(second, capture(&outcomes));
    assert_eq!(queue.len(), 2);
    assert_head_exclusive(&queue);

    manager.complete_sync();

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            (SyncOutcome::Completed, None),
            (SyncOutcome::Completed, None)
        ]
    );
    assert!(queue.is_empty());
    // Only one sync actually ran.
    assert_eq!(manager.synced_requests().len(), 1);
}

#[test]
fn test_failure_outcome_fans_out_to_coalesced_requests() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    let first = SyncRequest::for_user_device("user-1", "device-1");
    let second = SyncRequest::for_user_device("user-1", "device-1");
    sleep(Duration::from_millis(5));

    queue.add(first, capture(&outcomes));
    queue.add(second, capture(&outcomes));

    let error = SyncError::Manager("remote unavailable".into());
    manager.fail_sync(Some(error.clone()));

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            (SyncOutcome::Failed, Some(error.clone())),
            (SyncOutcome::Failed, Some(error))
        ]
    );
    assert!(queue.is_empty());
}

#[test]
fn test_different_device_is_never_coalesced() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    let first = SyncRequest::for_user_device("user-1", "device-1");
    let second = SyncRequest::for_user_device("user-2", "device-2");
    sleep(Duration::from_millis(5));

    queue.add(first, capture(&outcomes));
    queue.add(second, capture(&outcomes));
    assert_head_exclusive(&queue);

    // First sync completes; the second request targets another device and
    // must run its own sync.
    manager.complete_sync();

    assert_eq!(outcomes.lock().unwrap().len(), 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.head_state(), Some(RequestState::InProgress));
    assert_eq!(manager.synced_requests().len(), 2);
    assert_head_exclusive(&queue);

    manager.complete_sync();

    assert_eq!(outcomes.lock().unwrap().len(), 2);
    assert!(queue.is_empty());
}

#[test]
fn test_second_request_waits_until_first_completes() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );
    // Created after the first sync started: never coalesced.
    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );

    let states: Vec<RequestState> = queue.requests().iter().map(|r| r.state()).collect();
    assert_eq!(states, vec![RequestState::InProgress, RequestState::Pending]);

    manager.fail_sync(None);

    // The failure completed the head only; the second request started.
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(SyncOutcome::Failed, None)]
    );
    assert_eq!(queue.head_state(), Some(RequestState::InProgress));

    manager.complete_sync();
    assert_eq!(outcomes.lock().unwrap().len(), 2);
    assert!(queue.is_empty());
}

#[test]
fn test_request_without_user_syncs_last_known_user() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    queue.add(SyncRequest::new(), capture(&outcomes));

    assert_eq!(manager.last_user_sync_count(), 1);
    assert!(manager.synced_requests().is_empty());

    manager.complete_sync();
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(SyncOutcome::Completed, None)]
    );
}

#[test]
fn test_start_failure_completes_immediately_and_drains() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    manager.set_sync_with_error(Some(SyncError::Manager("no session".into())));

    // Distinct targets so neither drains through coalescing; each start
    // attempt must fail on its own.
    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );
    queue.add(
        SyncRequest::for_user_device("user-2", "device-2"),
        capture(&outcomes),
    );

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    for (outcome, error) in outcomes.iter() {
        assert_eq!(*outcome, SyncOutcome::Failed);
        assert_eq!(*error, Some(SyncError::Manager("no session".into())));
    }
    assert!(queue.is_empty());
    assert!(manager.synced_requests().is_empty());
}

#[test]
fn test_last_user_start_failure_completes_immediately() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    manager.set_last_user_error(Some(SyncError::MissingUser));

    queue.add(SyncRequest::new(), capture(&outcomes));

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(SyncOutcome::Failed, Some(SyncError::MissingUser))]
    );
    assert!(queue.is_empty());
}

#[test]
fn test_add_while_manager_busy_waits_for_outcome_event() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
    manager.set_syncing(true);

    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );

    // An unrelated sync is running; the request waits its turn.
    assert_eq!(queue.head_state(), Some(RequestState::Pending));
    assert!(manager.synced_requests().is_empty());

    // The running sync ends. The event finds no in-progress head and just
    // advances the queue.
    manager.complete_sync();
    assert_eq!(queue.head_state(), Some(RequestState::InProgress));
    assert_eq!(manager.synced_requests().len(), 1);
    assert!(outcomes.lock().unwrap().is_empty());

    manager.complete_sync();
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![(SyncOutcome::Completed, None)]
    );
    assert!(queue.is_empty());
}

#[test]
fn test_spurious_event_on_empty_queue_is_harmless() {
    let (queue, manager) = queue_with_manager(zero_delay());

    manager.complete_sync();
    manager.fail_sync(None);

    assert!(queue.is_empty());
}

#[test]
fn test_delayed_advance_waits_for_poll() {
    let (queue, manager) = queue_with_manager(QueueConfig {
        advance_delay: Duration::from_millis(100),
    });
    let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));

    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );
    queue.add(
        SyncRequest::for_user_device("user-1", "device-1"),
        capture(&outcomes),
    );

    manager.complete_sync();

    // Head completed, but the next request holds for the grace period.
    assert_eq!(outcomes.lock().unwrap().len(), 1);
    assert_eq!(queue.head_state(), Some(RequestState::Pending));
    assert_eq!(manager.synced_requests().len(), 1);

    // Polling before the deadline is a no-op.
    queue.poll_at(Instant::now());
    assert_eq!(queue.head_state(), Some(RequestState::Pending));

    queue.poll_at(Instant::now() + Duration::from_millis(200));
    assert_eq!(queue.head_state(), Some(RequestState::InProgress));
    assert_eq!(manager.synced_requests().len(), 2);

    manager.complete_sync();
    assert_eq!(outcomes.lock().unwrap().len(), 2);
    assert!(queue.is_empty());
}

#[test]
fn test_queue_binds_and_releases_sync_events() {
    let manager = Arc::new(MockSyncManager::new());
    assert_eq!(manager.binding_count(), 0);

    let queue = SyncRequestQueue::with_config(manager.clone(), zero_delay());
    assert_eq!(manager.binding_count(), 2);

    drop(queue);
    assert_eq!(manager.binding_count(), 0);

    // Outcome events after teardown go nowhere.
    manager.complete_sync();
}

#[test]
fn test_completion_count_matches_adds() {
    let (queue, manager) = queue_with_manager(zero_delay());
    let fired = Arc::new(AtomicUsize::new(0));

    for index in 0..5 {
        let fired = fired.clone();
        let request =
            SyncRequest::for_user_device(&format!("user-{}", index % 2), "device-1");
        queue.add(request, move |_, _| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
        assert_head_exclusive(&queue);
    }

    let mut rounds = 0;
    while !queue.is_empty() {
        rounds += 1;
        assert!(rounds <= 10, "queue failed to drain");
        manager.complete_sync();
        assert_head_exclusive(&queue);
    }

    assert_eq!(fired.load(Ordering::SeqCst), 5);
}

proptest! {
    /// For all interleavings of adds and outcomes, every request completes
    /// exactly once.
    #[test]
    fn prop_every_request_completes_exactly_once(
        targets in prop::collection::vec((0u8..3, 0u8..2), 1..12),
        failures in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let manager = Arc::new(MockSyncManager::new());
        let queue = SyncRequestQueue::with_config(manager.clone(), zero_delay());
        let fired = Arc::new(AtomicUsize::new(0));

        for (user, device) in &targets {
            let request = SyncRequest::for_user_device(
                &format!("user-{user}"),
                &format!("device-{device}"),
            );
            let fired = fired.clone();
            let fired_once = AtomicBool::new(false);
            queue.add(request, move |_, _| {
                assert!(!fired_once.swap(true, Ordering::SeqCst), "completion fired twice");
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut outcomes = failures.into_iter();
        let mut rounds = 0;
        while !queue.is_empty() {
            rounds += 1;
            prop_assert!(rounds <= 64, "queue failed to drain");
            if outcomes.next().unwrap_or(true) {
                manager.complete_sync();
            } else {
                manager.fail_sync(Some(SyncError::Manager("injected".into())));
            }
        }

        prop_assert_eq!(fired.load(Ordering::SeqCst), targets.len());
    }
}
