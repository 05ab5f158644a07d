//! Device Transport Seam
//!
//! Platform-agnostic abstraction over the physical device link.

use serde::{Deserialize, Serialize};

use super::apdu::{ApduCommand, ApduPackage, NonApduCommit};
use super::error::DeviceError;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, DeviceError>;

/// State of the device link.
///
/// Owned exclusively by the command execution engine; every transition is
/// published as a connection-state-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Engine constructed, link never used.
    New,
    /// Link torn down.
    Disconnected,
    /// Connect procedure running.
    Connecting,
    /// Link up, device info not yet validated.
    Connected,
    /// Link being torn down.
    Disconnecting,
    /// Link up and device ready for commands.
    Initialized,
}

/// Info record collected from a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier.
    pub device_id: String,
    /// Human-readable device name.
    pub name: String,
    /// Firmware revision, if reported.
    pub firmware_version: Option<String>,
    /// Secure element identifier, if reported.
    pub secure_element_id: Option<String>,
}

impl Device {
    /// Creates a device record with the required fields.
    pub fn new(device_id: &str, name: &str) -> Self {
        Device {
            device_id: device_id.to_string(),
            name: name.to_string(),
            firmware_version: None,
            secure_element_id: None,
        }
    }
}

/// Optional operations a transport implementation declares once.
///
/// The engine captures this at construction and never re-queries. A
/// capability left `false` means the engine treats the operation as a
/// no-op that succeeds trivially.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Transport implements `execute_apdu_command`.
    pub apdu_commands: bool,
    /// Transport implements `execute_apdu_package`.
    pub apdu_packages: bool,
    /// Transport wants `on_pre_apdu_package_execute` called.
    pub pre_apdu_package_hook: bool,
    /// Transport wants `on_post_apdu_package_execute` called.
    pub post_apdu_package_hook: bool,
    /// Transport implements `process_non_apdu_commit`.
    pub non_apdu_commits: bool,
    /// Transport implements `handle_id_verification_request`.
    pub id_verification: bool,
}

/// Response to an identity verification request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdVerificationResponse {
    /// Opaque verification document produced by the device, if any.
    pub payload: Option<serde_json::Value>,
}

/// Transport trait for the device link.
///
/// This trait abstracts the radio driver talking to the wearable (BLE or
/// otherwise), allowing platform-specific implementations and easy testing
/// with mocks.
///
/// # Synchronous Interface
///
/// Methods here start work and return; device responses re-enter the engine
/// through its completion entry points (`complete_apdu`,
/// `complete_apdu_package`, `complete_non_apdu_commit`) and device-originated
/// occurrences through `call_completion_for_event`. Platform implementations
/// may internally use async runtimes but expose a blocking interface here.
///
/// # Example
///
/// ```ignore
/// use wristlet_core::device::{CommandExecutor, MockDeviceTransport};
/// use wristlet_core::events::EventChannel;
/// use std::sync::Arc;
///
/// let transport = MockDeviceTransport::new();
/// let events = Arc::new(EventChannel::new());
/// let executor = CommandExecutor::new(transport, events);
/// executor.connect(None);
/// ```
pub trait DeviceTransport: Send {
    /// Declares which optional hooks this transport implements.
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Returns true while the physical link is up.
    fn is_connected(&self) -> bool;

    /// Starts the connect procedure.
    ///
    /// Completion is surfaced through the engine's event entry point as a
    /// device-connected event.
    fn connect(&mut self) -> TransportResult<()>;

    /// Forces the device link back to its default state.
    fn reset_to_default_state(&mut self) -> TransportResult<()>;

    /// Validates the current connection.
    fn validate_connection(&mut self) -> TransportResult<bool>;

    /// Returns the collected device info, if available.
    fn device_info(&self) -> Option<Device>;

    /// Starts sending one APDU command. Only called when declared.
    fn execute_apdu_command(&mut self, command: &ApduCommand) -> TransportResult<()> {
        let _ = command;
        Ok(())
    }

    /// Starts executing a whole APDU package. Only called when declared.
    fn execute_apdu_package(&mut self, package: &ApduPackage) -> TransportResult<()> {
        let _ = package;
        Ok(())
    }

    /// Hook run before a package execution. Only called when declared.
    fn on_pre_apdu_package_execute(&mut self) -> TransportResult<()> {
        Ok(())
    }

    /// Hook run after a package execution. Only called when declared.
    fn on_post_apdu_package_execute(&mut self) -> TransportResult<()> {
        Ok(())
    }

    /// Starts applying a non-APDU commit. Only called when declared.
    fn process_non_apdu_commit(&mut self, commit: &NonApduCommit) -> TransportResult<()> {
        let _ = commit;
        Ok(())
    }

    /// Answers an identity verification request. Only called when declared.
    fn handle_id_verification_request(&mut self) -> TransportResult<IdVerificationResponse> {
        Ok(IdVerificationResponse::default())
    }
}
