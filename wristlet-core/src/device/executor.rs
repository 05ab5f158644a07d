//! Command Execution Engine
//!
//! Owns the device connection state machine and sequential command dispatch.
//! At most one APDU exchange (command or package) is outstanding at any
//! time; each in-flight operation is bounded by a deadline and resolved
//! exactly once from whichever of {transport callback, timeout, disconnect}
//! fires first. The pending record holding the one-shot completion is taken
//! under the engine lock, which makes the winner selection an indivisible
//! checked-and-set.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::events::{EventChannel, EventKind, WristletEvent};

use super::apdu::{
    ApduCommand, ApduPackage, ApduResponse, CommitState, NonApduCommit, ResponseState,
};
use super::error::DeviceError;
use super::transport::{
    ConnectionState, Device, DeviceTransport, IdVerificationResponse, TransportCapabilities,
    TransportResult,
};

/// Default window an in-flight command may wait for the device.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the command execution engine.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Window an in-flight APDU exchange or commit may wait for the device.
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Completion callback for an APDU command.
pub type ApduCompletion =
    Box<dyn FnOnce(Option<ApduResponse>, ResponseState, Option<DeviceError>) + Send>;

/// Completion callback for an APDU package.
pub type PackageCompletion = Box<dyn FnOnce(ResponseState, Option<DeviceError>) + Send>;

/// Completion callback for a non-APDU commit.
pub type CommitCompletion = Box<dyn FnOnce(CommitState, Option<DeviceError>) + Send>;

/// The single outstanding APDU exchange.
enum PendingExchange {
    Command {
        sequence_id: u16,
        deadline: Instant,
        completion: ApduCompletion,
    },
    Package {
        deadline: Instant,
        completion: PackageCompletion,
        run_post_hook: bool,
    },
}

impl PendingExchange {
    fn deadline(&self) -> Instant {
        match self {
            PendingExchange::Command { deadline, .. } => *deadline,
            PendingExchange::Package { deadline, .. } => *deadline,
        }
    }
}

/// The single outstanding non-APDU commit.
struct PendingCommit {
    deadline: Instant,
    completion: CommitCompletion,
    disconnect_binding: Option<crate::events::SubscriptionToken>,
}

struct ExecutorInner<T> {
    transport: T,
    capabilities: TransportCapabilities,
    state: ConnectionState,
    pending_exchange: Option<PendingExchange>,
    pending_commit: Option<PendingCommit>,
    connect_deadline: Option<Instant>,
    config: ExecutorConfig,
}

impl<T: DeviceTransport> ExecutorInner<T> {
    /// Moves the connection state machine; returns the event to publish.
    fn transition(&mut self, next: ConnectionState) -> Option<WristletEvent> {
        if self.state == next {
            return None;
        }
        debug!(from = ?self.state, to = ?next, "connection state changed");
        self.state = next;
        Some(WristletEvent::ConnectionStateChanged { state: next })
    }
}

/// Command execution engine for one device link.
///
/// Cheap to clone; clones share the same engine. Completion callbacks and
/// events are always invoked after the internal lock is released, so they
/// may call back into the engine.
///
/// # Example
///
/// ```ignore
/// use wristlet_core::device::{ApduCommand, CommandExecutor, MockDeviceTransport};
/// use wristlet_core::events::EventChannel;
/// use std::sync::Arc;
///
/// let transport = MockDeviceTransport::new();
/// let events = Arc::new(EventChannel::new());
/// let executor = CommandExecutor::new(transport, events);
///
/// executor.execute_apdu_command(
///     ApduCommand::from_hex(1, "00a4040007a0000000041010")?,
///     Box::new(|response, state, error| { /* resolved exactly once */ }),
/// );
/// ```
pub struct CommandExecutor<T: DeviceTransport> {
    inner: Arc<Mutex<ExecutorInner<T>>>,
    events: Arc<EventChannel>,
}

impl<T: DeviceTransport> Clone for CommandExecutor<T> {
    fn clone(&self) -> Self {
        CommandExecutor {
            inner: Arc::clone(&self.inner),
            events: Arc::clone(&self.events),
        }
    }
}

impl<T: DeviceTransport + 'static> CommandExecutor<T> {
    /// Creates an engine with the default timeout window.
    pub fn new(transport: T, events: Arc<EventChannel>) -> Self {
        Self::with_config(transport, events, ExecutorConfig::default())
    }

    /// Creates an engine with an explicit configuration.
    ///
    /// The transport's capabilities are captured here and never re-queried.
    pub fn with_config(transport: T, events: Arc<EventChannel>, config: ExecutorConfig) -> Self {
        let capabilities = transport.capabilities();
        CommandExecutor {
            inner: Arc::new(Mutex::new(ExecutorInner {
                transport,
                capabilities,
                state: ConnectionState::New,
                pending_exchange: None,
                pending_commit: None,
                connect_deadline: None,
                config,
            })),
            events,
        }
    }

    /// Current state of the connection state machine.
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Capabilities captured from the transport at construction.
    pub fn capabilities(&self) -> TransportCapabilities {
        self.lock().capabilities
    }

    /// The event channel this engine publishes to.
    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// True while the physical link is up.
    pub fn is_connected(&self) -> bool {
        self.lock().transport.is_connected()
    }

    /// Device info collected by the transport, if available.
    pub fn device_info(&self) -> Option<Device> {
        self.lock().transport.device_info()
    }

    /// True while an APDU exchange is outstanding.
    pub fn has_outstanding_exchange(&self) -> bool {
        self.lock().pending_exchange.is_some()
    }

    /// True while a non-APDU commit is outstanding.
    pub fn has_outstanding_commit(&self) -> bool {
        self.lock().pending_commit.is_some()
    }

    /// Starts the connect procedure.
    ///
    /// If the link is already up, it is reset to the default state first.
    /// With a timeout window, a connect that has not produced a validated
    /// connection with collected device info by the deadline is forced back
    /// to `Disconnected` and reported as an `OperationTimeout`.
    pub fn connect(&self, timeout: Option<Duration>) {
        let (state_event, connect_result) = {
            let mut inner = self.lock();
            if inner.transport.is_connected() {
                // Reconnecting over a live link: return it to the default
                // state first.
                if let Err(err) = inner.transport.reset_to_default_state() {
                    warn!(error = %err, "reset before reconnect failed");
                }
            }
            inner.connect_deadline = timeout.map(|window| Instant::now() + window);
            let state_event = inner.transition(ConnectionState::Connecting);
            let connect_result = inner.transport.connect();
            (state_event, connect_result)
        };
        if let Some(event) = state_event {
            self.events.publish(event);
        }
        if let Err(err) = connect_result {
            self.finish_connect(None, Some(err));
        }
    }

    /// Tears the device link down.
    ///
    /// Any outstanding APDU exchange is resolved with
    /// `DeviceWasDisconnected`; an outstanding commit resolves through its
    /// disconnect subscription.
    pub fn disconnect(&self) -> TransportResult<()> {
        let (state_events, pending, reset_result) = {
            let mut inner = self.lock();
            if !inner.transport.is_connected() {
                return Err(DeviceError::DeviceShouldBeConnected);
            }
            let mut events = Vec::new();
            if let Some(event) = inner.transition(ConnectionState::Disconnecting) {
                events.push(event);
            }
            let reset_result = inner.transport.reset_to_default_state();
            if let Some(event) = inner.transition(ConnectionState::Disconnected) {
                events.push(event);
            }
            (events, inner.pending_exchange.take(), reset_result)
        };
        for event in state_events {
            self.events.publish(event);
        }
        // Whatever was in flight will never be answered now.
        if let Some(pending) = pending {
            self.resolve_exchange(
                pending,
                ResponseState::Failed,
                Some(DeviceError::DeviceWasDisconnected),
            );
        }
        self.events.publish(WristletEvent::DeviceDisconnected);
        reset_result
    }

    /// Executes one APDU command against the device.
    ///
    /// The completion fires exactly once: with the device's response, with
    /// `WaitingForApduResponse` when another exchange is outstanding, or
    /// with `ApduSendingTimeout` when the device never answers.
    pub fn execute_apdu_command(&self, command: ApduCommand, completion: ApduCompletion) {
        let mut inner = self.lock();
        if inner.pending_exchange.is_some() {
            drop(inner);
            completion(
                None,
                ResponseState::Failed,
                Some(DeviceError::WaitingForApduResponse),
            );
            return;
        }
        if !inner.capabilities.apdu_commands {
            drop(inner);
            // No APDU hook declared: succeed trivially.
            completion(
                Some(ApduResponse::success(command.sequence_id)),
                ResponseState::Processed,
                None,
            );
            return;
        }
        if !inner.transport.is_connected() {
            drop(inner);
            completion(
                None,
                ResponseState::Failed,
                Some(DeviceError::DeviceShouldBeConnected),
            );
            return;
        }
        let deadline = Instant::now() + inner.config.command_timeout;
        match inner.transport.execute_apdu_command(&command) {
            Ok(()) => {
                debug!(sequence_id = command.sequence_id, "apdu command issued");
                inner.pending_exchange = Some(PendingExchange::Command {
                    sequence_id: command.sequence_id,
                    deadline,
                    completion,
                });
            }
            Err(err) => {
                drop(inner);
                completion(None, ResponseState::Failed, Some(err));
            }
        }
    }

    /// Transport entry point: delivers the device's response for the
    /// outstanding APDU command.
    ///
    /// A response arriving after the command was already resolved (timeout,
    /// disconnect) is ignored.
    pub fn complete_apdu(&self, response: ApduResponse) {
        let taken = {
            let mut inner = self.lock();
            if matches!(&inner.pending_exchange, Some(PendingExchange::Command { .. })) {
                inner.pending_exchange.take()
            } else {
                None
            }
        };
        match taken {
            Some(PendingExchange::Command {
                sequence_id,
                completion,
                ..
            }) => match response.validate(sequence_id) {
                Ok(()) if response.is_success() => {
                    debug!(sequence_id, "apdu command processed");
                    completion(Some(response), ResponseState::Processed, None);
                }
                Ok(()) => {
                    debug!(sequence_id, "apdu error response");
                    completion(
                        Some(response),
                        ResponseState::Error,
                        Some(DeviceError::ApduErrorResponse),
                    );
                }
                Err(err) => {
                    warn!(sequence_id, error = %err, "invalid apdu response");
                    completion(Some(response), ResponseState::Error, Some(err));
                }
            },
            _ => debug!("apdu response with no outstanding command, ignoring"),
        }
    }

    /// Executes a whole APDU package through the transport's package hook.
    ///
    /// Pre/post package hooks run when declared. The package occupies the
    /// same single outstanding-exchange slot as a lone command.
    pub fn execute_apdu_package(&self, package: ApduPackage, completion: PackageCompletion) {
        let mut inner = self.lock();
        if inner.pending_exchange.is_some() {
            drop(inner);
            completion(
                ResponseState::Failed,
                Some(DeviceError::WaitingForApduResponse),
            );
            return;
        }
        if !inner.capabilities.apdu_packages {
            drop(inner);
            // No package hook declared: succeed trivially.
            completion(ResponseState::Processed, None);
            return;
        }
        if !inner.transport.is_connected() {
            drop(inner);
            completion(
                ResponseState::Failed,
                Some(DeviceError::DeviceShouldBeConnected),
            );
            return;
        }
        if inner.capabilities.pre_apdu_package_hook {
            if let Err(err) = inner.transport.on_pre_apdu_package_execute() {
                drop(inner);
                completion(ResponseState::Failed, Some(err));
                return;
            }
        }
        let deadline = Instant::now() + inner.config.command_timeout;
        let run_post_hook = inner.capabilities.post_apdu_package_hook;
        match inner.transport.execute_apdu_package(&package) {
            Ok(()) => {
                debug!(package_id = %package.package_id, commands = package.len(), "apdu package issued");
                inner.pending_exchange = Some(PendingExchange::Package {
                    deadline,
                    completion,
                    run_post_hook,
                });
            }
            Err(err) => {
                drop(inner);
                completion(ResponseState::Failed, Some(err));
            }
        }
    }

    /// Transport entry point: the package run finished with the given state.
    pub fn complete_apdu_package(&self, state: ResponseState, error: Option<DeviceError>) {
        let taken = {
            let mut inner = self.lock();
            if matches!(&inner.pending_exchange, Some(PendingExchange::Package { .. })) {
                inner.pending_exchange.take()
            } else {
                None
            }
        };
        match taken {
            Some(pending) => self.resolve_exchange(pending, state, error),
            None => debug!("package completion with nothing pending, ignoring"),
        }
    }

    /// Applies a non-APDU commit through the transport's commit hook.
    ///
    /// Without a declared hook the commit resolves immediately as `Skipped`.
    /// While pending, the engine watches the device-disconnected event; a
    /// disconnect, a transport callback, or the timeout resolves the commit,
    /// whichever fires first.
    pub fn process_non_apdu_commit(&self, commit: NonApduCommit, completion: CommitCompletion) {
        let mut inner = self.lock();
        if inner.pending_commit.is_some() {
            drop(inner);
            completion(CommitState::Failed, Some(DeviceError::TryLater));
            return;
        }
        if !inner.capabilities.non_apdu_commits {
            drop(inner);
            // No commit hook declared: nothing to apply.
            completion(CommitState::Skipped, None);
            return;
        }
        if !inner.transport.is_connected() {
            drop(inner);
            completion(
                CommitState::Failed,
                Some(DeviceError::DeviceShouldBeConnected),
            );
            return;
        }
        // Watch for the link dropping while the commit is pending.
        let watcher = self.clone();
        let binding = self.events.subscribe(
            EventKind::DeviceDisconnected,
            Arc::new(move |_: &WristletEvent| watcher.resolve_commit_disconnected()),
        );
        let deadline = Instant::now() + inner.config.command_timeout;
        inner.pending_commit = Some(PendingCommit {
            deadline,
            completion,
            disconnect_binding: Some(binding),
        });
        match inner.transport.process_non_apdu_commit(&commit) {
            Ok(()) => {
                debug!(commit_id = %commit.commit_id, "non-apdu commit handed to transport");
            }
            Err(err) => {
                let pending = inner.pending_commit.take();
                drop(inner);
                if let Some(pending) = pending {
                    self.finish_commit(pending, CommitState::Failed, Some(err));
                }
            }
        }
    }

    /// Transport entry point: the commit finished with the given state.
    pub fn complete_non_apdu_commit(&self, state: CommitState, error: Option<DeviceError>) {
        let pending = { self.lock().pending_commit.take() };
        match pending {
            Some(pending) => self.finish_commit(pending, state, error),
            None => debug!("commit completion with nothing pending, ignoring"),
        }
    }

    /// Answers an identity verification request from the device.
    ///
    /// Without a declared hook, a default (empty) response is returned.
    pub fn handle_id_verification_request(&self) -> TransportResult<IdVerificationResponse> {
        let mut inner = self.lock();
        if !inner.capabilities.id_verification {
            return Ok(IdVerificationResponse::default());
        }
        inner.transport.handle_id_verification_request()
    }

    /// Single entry point transports use to surface device-originated
    /// occurrences into the event channel.
    ///
    /// Connection events also drive the engine's state machine; everything
    /// else is forwarded as-is.
    pub fn call_completion_for_event(&self, event: WristletEvent) {
        match event {
            WristletEvent::DeviceConnected { device, error } => self.finish_connect(device, error),
            WristletEvent::DeviceDisconnected => {
                let state_event = { self.lock().transition(ConnectionState::Disconnected) };
                if let Some(event) = state_event {
                    self.events.publish(event);
                }
                self.events.publish(WristletEvent::DeviceDisconnected);
            }
            other => self.events.publish(other),
        }
    }

    /// Resolves any in-flight operation whose deadline has passed.
    ///
    /// The host drives this from its scheduling loop.
    pub fn check_timeouts(&self) {
        self.check_timeouts_at(Instant::now());
    }

    /// Deadline check against an explicit clock reading (for deterministic
    /// tests).
    pub fn check_timeouts_at(&self, now: Instant) {
        let expired_exchange = {
            let mut inner = self.lock();
            let due = match &inner.pending_exchange {
                Some(pending) => pending.deadline() <= now,
                None => false,
            };
            if due {
                inner.pending_exchange.take()
            } else {
                None
            }
        };
        if let Some(pending) = expired_exchange {
            warn!("apdu exchange timed out");
            self.resolve_exchange(
                pending,
                ResponseState::Expired,
                Some(DeviceError::ApduSendingTimeout),
            );
        }

        let expired_commit = {
            let mut inner = self.lock();
            let due = match &inner.pending_commit {
                Some(pending) => pending.deadline <= now,
                None => false,
            };
            if due {
                inner.pending_commit.take()
            } else {
                None
            }
        };
        if let Some(pending) = expired_commit {
            warn!("non-apdu commit timed out");
            self.finish_commit(
                pending,
                CommitState::Failed,
                Some(DeviceError::NonApduProcessingTimeout),
            );
        }

        let connect_expired = {
            let mut inner = self.lock();
            match inner.connect_deadline {
                Some(deadline) if deadline <= now && inner.state == ConnectionState::Connecting => {
                    inner.connect_deadline = None;
                    if let Err(err) = inner.transport.reset_to_default_state() {
                        warn!(error = %err, "reset after connect timeout failed");
                    }
                    inner.transition(ConnectionState::Disconnected)
                }
                _ => None,
            }
        };
        if let Some(event) = connect_expired {
            warn!("connect attempt timed out");
            self.events.publish(event);
            self.events.publish(WristletEvent::DeviceConnected {
                device: None,
                error: Some(DeviceError::OperationTimeout),
            });
        }
    }

    /// Resolves the connect attempt: validates the link, collects device
    /// info, and publishes the terminal device-connected event.
    fn finish_connect(&self, device: Option<Device>, error: Option<DeviceError>) {
        let mut state_events: Vec<WristletEvent> = Vec::new();
        let (device, error) = {
            let mut inner = self.lock();
            inner.connect_deadline = None;
            let mut device = device;
            let mut error = error;
            if error.is_none() {
                if let Some(event) = inner.transition(ConnectionState::Connected) {
                    state_events.push(event);
                }
                device = device.or_else(|| inner.transport.device_info());
                if device.is_none() {
                    error = Some(DeviceError::DeviceDataNotCollected);
                } else {
                    match inner.transport.validate_connection() {
                        Ok(true) => {}
                        Ok(false) => error = Some(DeviceError::BadBleState),
                        Err(err) => error = Some(err),
                    }
                }
            }
            let next = if error.is_none() {
                ConnectionState::Initialized
            } else {
                ConnectionState::Disconnected
            };
            if let Some(event) = inner.transition(next) {
                state_events.push(event);
            }
            if error.is_some() {
                device = None;
            }
            (device, error)
        };
        for event in state_events {
            self.events.publish(event);
        }
        self.events.publish(WristletEvent::DeviceConnected { device, error });
    }

    /// Resolves a taken exchange record, running the post-package hook when
    /// the exchange was a package that asked for it.
    fn resolve_exchange(
        &self,
        pending: PendingExchange,
        state: ResponseState,
        error: Option<DeviceError>,
    ) {
        match pending {
            PendingExchange::Command { completion, .. } => completion(None, state, error),
            PendingExchange::Package {
                completion,
                run_post_hook,
                ..
            } => {
                if run_post_hook {
                    let hook_result = { self.lock().transport.on_post_apdu_package_execute() };
                    if let Err(err) = hook_result {
                        warn!(error = %err, "post-package hook failed");
                    }
                }
                completion(state, error);
            }
        }
    }

    /// Disconnect-subscription path for a pending commit.
    fn resolve_commit_disconnected(&self) {
        let pending = { self.lock().pending_commit.take() };
        if let Some(pending) = pending {
            warn!("device disconnected while a non-apdu commit was pending");
            self.finish_commit(
                pending,
                CommitState::Failed,
                Some(DeviceError::NonApduProcessingTimeout),
            );
        }
    }

    /// Releases the commit's disconnect subscription and fires its
    /// completion.
    fn finish_commit(
        &self,
        pending: PendingCommit,
        state: CommitState,
        error: Option<DeviceError>,
    ) {
        if let Some(binding) = pending.disconnect_binding {
            self.events.unsubscribe(binding);
        }
        (pending.completion)(state, error);
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
