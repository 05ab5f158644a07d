//! Event Channel
//!
//! Typed publish/subscribe used for all cross-component communication.
//! Subscriptions are keyed by [`EventKind`] and identified by opaque
//! tokens; the owner of a token is responsible for releasing it before
//! the handler's captured state goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::event::{EventKind, WristletEvent};

/// Callback invoked with each published event.
pub type EventHandler = Arc<dyn Fn(&WristletEvent) + Send + Sync>;

/// Execution context a subscription's handler runs on.
///
/// The default context invokes handlers inline on the publishing thread.
/// A host can supply its own context to defer delivery onto a queue or
/// thread of its choosing.
pub trait ExecutionContext: Send + Sync {
    /// Runs the given task.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Inline execution context: runs tasks immediately on the caller's thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Opaque handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    id: u64,
    kind: EventKind,
}

impl SubscriptionToken {
    /// The event kind this token subscribes to.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Subscription {
    id: u64,
    handler: EventHandler,
    context: Option<Arc<dyn ExecutionContext>>,
}

/// Typed publish/subscribe channel.
///
/// Publishing snapshots the subscriber list for the event's kind, then
/// re-checks each subscription's liveness just before invoking it, so a
/// handler removed while a publish is in flight is never called by that
/// publish. Handlers for one kind run in subscription order.
pub struct EventChannel {
    subscriptions: Mutex<HashMap<EventKind, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        EventChannel {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a handler for one event kind on the inline context.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionToken {
        self.insert(kind, handler, None)
    }

    /// Registers a handler for one event kind on a custom execution context.
    pub fn subscribe_on(
        &self,
        kind: EventKind,
        handler: EventHandler,
        context: Arc<dyn ExecutionContext>,
    ) -> SubscriptionToken {
        self.insert(kind, handler, Some(context))
    }

    /// Removes a single subscription.
    ///
    /// Returns `false` when the token was already released.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.lock();
        match subs.get_mut(&token.kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|s| s.id != token.id);
                before != list.len()
            }
            None => false,
        }
    }

    /// Removes every subscription on the channel.
    pub fn unsubscribe_all(&self) {
        self.lock().clear();
    }

    /// Returns the total number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().values().map(|v| v.len()).sum()
    }

    /// Delivers an event to every handler subscribed to its kind.
    pub fn publish(&self, event: WristletEvent) {
        let kind = event.kind();
        let snapshot: Vec<(u64, EventHandler, Option<Arc<dyn ExecutionContext>>)> = {
            let subs = self.lock();
            match subs.get(&kind) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.id, s.handler.clone(), s.context.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        debug!(kind = ?kind, handlers = snapshot.len(), "publishing event");

        for (id, handler, context) in snapshot {
            // A subscriber removed while this publish is in flight must not run.
            if !self.is_subscribed(kind, id) {
                continue;
            }
            match context {
                None => handler(&event),
                Some(ctx) => {
                    let deferred = event.clone();
                    ctx.execute(Box::new(move || handler(&deferred)));
                }
            }
        }
    }

    fn insert(
        &self,
        kind: EventKind,
        handler: EventHandler,
        context: Option<Arc<dyn ExecutionContext>>,
    ) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(kind).or_default().push(Subscription {
            id,
            handler,
            context,
        });
        SubscriptionToken { id, kind }
    }

    fn is_subscribed(&self, kind: EventKind, id: u64) -> bool {
        self.lock()
            .get(&kind)
            .is_some_and(|list| list.iter().any(|s| s.id == id))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Subscription>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        EventChannel::new()
    }
}
