//! Mock Device Transport
//!
//! Scriptable transport for tests and host integration work. State lives
//! behind a shared handle so a test can keep inspecting the transport after
//! handing a clone to the engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::apdu::{ApduCommand, ApduPackage, NonApduCommit};
use super::error::DeviceError;
use super::transport::{
    Device, DeviceTransport, IdVerificationResponse, TransportCapabilities, TransportResult,
};

struct MockTransportState {
    connected: bool,
    device: Option<Device>,
    capabilities: TransportCapabilities,
    connect_error: Option<DeviceError>,
    command_error: Option<DeviceError>,
    package_error: Option<DeviceError>,
    commit_error: Option<DeviceError>,
    validation_passes: bool,
    executed_commands: Vec<ApduCommand>,
    executed_packages: Vec<ApduPackage>,
    processed_commits: Vec<NonApduCommit>,
    pre_package_hooks: usize,
    post_package_hooks: usize,
    resets: usize,
    id_verifications: usize,
}

impl Default for MockTransportState {
    fn default() -> Self {
        MockTransportState {
            connected: false,
            device: None,
            capabilities: TransportCapabilities::default(),
            connect_error: None,
            command_error: None,
            package_error: None,
            commit_error: None,
            validation_passes: true,
            executed_commands: Vec::new(),
            executed_packages: Vec::new(),
            processed_commits: Vec::new(),
            pre_package_hooks: 0,
            post_package_hooks: 0,
            resets: 0,
            id_verifications: 0,
        }
    }
}

/// Mock transport for testing.
///
/// Clones share state, so keep one handle and give another to the engine.
#[derive(Clone, Default)]
pub struct MockDeviceTransport {
    shared: Arc<Mutex<MockTransportState>>,
}

impl MockDeviceTransport {
    /// Creates a disconnected transport with no optional capabilities.
    pub fn new() -> Self {
        MockDeviceTransport::default()
    }

    /// Declares the transport's optional capabilities.
    pub fn set_capabilities(&self, capabilities: TransportCapabilities) {
        self.lock().capabilities = capabilities;
    }

    /// Sets the device info the transport reports once connected.
    pub fn set_device(&self, device: Device) {
        self.lock().device = Some(device);
    }

    /// Forces the link state without going through connect/reset.
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Makes every subsequent connect attempt fail with the given error.
    pub fn set_connect_error(&self, error: Option<DeviceError>) {
        self.lock().connect_error = error;
    }

    /// Makes every subsequent APDU command fail synchronously.
    pub fn set_command_error(&self, error: Option<DeviceError>) {
        self.lock().command_error = error;
    }

    /// Makes every subsequent package execution fail synchronously.
    pub fn set_package_error(&self, error: Option<DeviceError>) {
        self.lock().package_error = error;
    }

    /// Makes every subsequent commit fail synchronously.
    pub fn set_commit_error(&self, error: Option<DeviceError>) {
        self.lock().commit_error = error;
    }

    /// Controls the outcome of connection validation.
    pub fn set_validation_passes(&self, passes: bool) {
        self.lock().validation_passes = passes;
    }

    /// Commands the engine asked this transport to execute.
    pub fn executed_commands(&self) -> Vec<ApduCommand> {
        self.lock().executed_commands.clone()
    }

    /// Packages the engine asked this transport to execute.
    pub fn executed_packages(&self) -> Vec<ApduPackage> {
        self.lock().executed_packages.clone()
    }

    /// Commits the engine asked this transport to apply.
    pub fn processed_commits(&self) -> Vec<NonApduCommit> {
        self.lock().processed_commits.clone()
    }

    /// Number of times the engine forced a reset.
    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    /// Number of pre-package hook invocations.
    pub fn pre_package_hook_count(&self) -> usize {
        self.lock().pre_package_hooks
    }

    /// Number of post-package hook invocations.
    pub fn post_package_hook_count(&self) -> usize {
        self.lock().post_package_hooks
    }

    /// Number of identity verification requests answered.
    pub fn id_verification_count(&self) -> usize {
        self.lock().id_verifications
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceTransport for MockDeviceTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.lock().capabilities
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn connect(&mut self) -> TransportResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.connected = true;
        Ok(())
    }

    fn reset_to_default_state(&mut self) -> TransportResult<()> {
        let mut state = self.lock();
        state.resets += 1;
        state.connected = false;
        Ok(())
    }

    fn validate_connection(&mut self) -> TransportResult<bool> {
        Ok(self.lock().validation_passes)
    }

    fn device_info(&self) -> Option<Device> {
        self.lock().device.clone()
    }

    fn execute_apdu_command(&mut self, command: &ApduCommand) -> TransportResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.command_error.clone() {
            return Err(error);
        }
        state.executed_commands.push(command.clone());
        Ok(())
    }

    fn execute_apdu_package(&mut self, package: &ApduPackage) -> TransportResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.package_error.clone() {
            return Err(error);
        }
        state.executed_packages.push(package.clone());
        Ok(())
    }

    fn on_pre_apdu_package_execute(&mut self) -> TransportResult<()> {
        self.lock().pre_package_hooks += 1;
        Ok(())
    }

    fn on_post_apdu_package_execute(&mut self) -> TransportResult<()> {
        self.lock().post_package_hooks += 1;
        Ok(())
    }

    fn process_non_apdu_commit(&mut self, commit: &NonApduCommit) -> TransportResult<()> {
        let mut state = self.lock();
        if let Some(error) = state.commit_error.clone() {
            return Err(error);
        }
        state.processed_commits.push(commit.clone());
        Ok(())
    }

    fn handle_id_verification_request(&mut self) -> TransportResult<IdVerificationResponse> {
        self.lock().id_verifications += 1;
        Ok(IdVerificationResponse::default())
    }
}
