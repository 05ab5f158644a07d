// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device + Command Execution Layer
//!
//! Drives the APDU command protocol and non-APDU commits against a wearable
//! payment device over an abstract transport link.
//!
//! # Architecture
//!
//! The device layer consists of:
//! - **APDU model**: command, response, package, and commit records
//! - **Transport trait**: platform-agnostic interface to the device radio
//! - **Capability descriptor**: optional transport hooks, declared once
//! - **Command executor**: sequential dispatch, timeouts, connection state
//!
//! # Example
//!
//! ```ignore
//! use wristlet_core::device::{ApduCommand, CommandExecutor, MockDeviceTransport};
//! use wristlet_core::events::EventChannel;
//! use std::sync::Arc;
//!
//! let transport = MockDeviceTransport::new();
//! let events = Arc::new(EventChannel::new());
//! let executor = CommandExecutor::new(transport, events.clone());
//!
//! executor.connect(None);
//! executor.execute_apdu_command(command, Box::new(|response, state, error| {
//!     // resolved exactly once, from response, timeout, or disconnect
//! }));
//! ```

#[cfg(feature = "testing")]
pub mod apdu;
#[cfg(not(feature = "testing"))]
mod apdu;

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod executor;
#[cfg(not(feature = "testing"))]
mod executor;

#[cfg(feature = "testing")]
pub mod mock;
#[cfg(not(feature = "testing"))]
mod mock;

#[cfg(feature = "testing")]
pub mod transport;
#[cfg(not(feature = "testing"))]
mod transport;

// Error types
pub use error::DeviceError;

// APDU/commit data model
pub use apdu::{ApduCommand, ApduPackage, ApduResponse, CommitState, NonApduCommit, ResponseState};

// Transport abstraction
pub use transport::{
    ConnectionState, Device, DeviceTransport, IdVerificationResponse, TransportCapabilities,
    TransportResult,
};

// Mock transport for testing
pub use mock::MockDeviceTransport;

// Command execution engine
pub use executor::{
    ApduCompletion, CommandExecutor, CommitCompletion, ExecutorConfig, PackageCompletion,
    DEFAULT_COMMAND_TIMEOUT,
};
