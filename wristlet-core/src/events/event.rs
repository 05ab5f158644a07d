//! Event Payloads
//!
//! Typed events emitted by the command execution engine and the sync
//! request queue. Payloads originating on the device (notifications,
//! security state, application control) are carried as raw bytes; their
//! encodings belong to the transport.

use crate::device::{ConnectionState, Device, DeviceError};
use crate::sync::SyncError;

/// Type tag identifying an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The device link transitioned to a new state.
    ConnectionStateChanged,
    /// A connect attempt finished, successfully or not.
    DeviceConnected,
    /// The device link was lost.
    DeviceDisconnected,
    /// The device pushed a notification.
    NotificationReceived,
    /// The secure element changed security state.
    SecurityStateChanged,
    /// The device requested application control.
    ApplicationControlReceived,
    /// A sync run finished successfully.
    SyncCompleted,
    /// A sync run failed.
    SyncFailed,
}

/// Events emitted by Wristlet.
#[derive(Debug, Clone)]
pub enum WristletEvent {
    /// The device link transitioned to a new state.
    ConnectionStateChanged {
        /// The new connection state.
        state: ConnectionState,
    },

    /// A connect attempt finished.
    ///
    /// Carries the collected device info on success, or the classified
    /// failure otherwise.
    DeviceConnected {
        /// Info collected from the connected device.
        device: Option<Device>,
        /// Why the connect attempt failed, if it did.
        error: Option<DeviceError>,
    },

    /// The device link was lost.
    DeviceDisconnected,

    /// The device pushed a notification payload.
    NotificationReceived {
        /// Raw notification bytes.
        payload: Vec<u8>,
    },

    /// The device's secure element changed security state.
    SecurityStateChanged {
        /// Raw state bytes as reported by the device.
        payload: Vec<u8>,
    },

    /// The device requested application control.
    ApplicationControlReceived {
        /// Raw control bytes as reported by the device.
        payload: Vec<u8>,
    },

    /// A sync run finished successfully.
    SyncCompleted,

    /// A sync run failed.
    SyncFailed {
        /// The failure the sync manager reported, if classified.
        error: Option<SyncError>,
    },
}

impl WristletEvent {
    /// Returns the type tag used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            WristletEvent::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            WristletEvent::DeviceConnected { .. } => EventKind::DeviceConnected,
            WristletEvent::DeviceDisconnected => EventKind::DeviceDisconnected,
            WristletEvent::NotificationReceived { .. } => EventKind::NotificationReceived,
            WristletEvent::SecurityStateChanged { .. } => EventKind::SecurityStateChanged,
            WristletEvent::ApplicationControlReceived { .. } => {
                EventKind::ApplicationControlReceived
            }
            WristletEvent::SyncCompleted => EventKind::SyncCompleted,
            WristletEvent::SyncFailed { .. } => EventKind::SyncFailed,
        }
    }

    /// Extracts the failure payload from a sync-failed event.
    ///
    /// Returns `None` for every other event kind.
    pub fn sync_error(&self) -> Option<SyncError> {
        match self {
            WristletEvent::SyncFailed { error } => error.clone(),
            _ => None,
        }
    }
}
