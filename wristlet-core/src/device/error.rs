// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device Error Types

use thiserror::Error;

/// Errors emitted by the command execution engine and device transports.
///
/// Every variant carries a stable numeric [`code`](DeviceError::code) next
/// to its display text. Callers branch on the code, never on the text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device is in a bad BLE state")]
    BadBleState,

    #[error("device data was not collected")]
    DeviceDataNotCollected,

    #[error("still waiting for a response to the previous APDU command")]
    WaitingForApduResponse,

    #[error("APDU packet is corrupted")]
    ApduPacketCorrupted,

    #[error("APDU response data is incomplete")]
    ApduDataNotFull,

    #[error("device answered with an APDU error response")]
    ApduErrorResponse,

    #[error("APDU response carries an unexpected sequence id")]
    ApduWrongSequenceId,

    #[error("timed out waiting for an APDU response")]
    ApduSendingTimeout,

    #[error("operation timed out")]
    OperationTimeout,

    #[error("device should be disconnected for this operation")]
    DeviceShouldBeDisconnected,

    #[error("device should be connected for this operation")]
    DeviceShouldBeConnected,

    #[error("device is busy, try later")]
    TryLater,

    #[error("timed out processing a non-APDU commit")]
    NonApduProcessingTimeout,

    #[error("device was disconnected")]
    DeviceWasDisconnected,

    #[error("unknown error")]
    UnknownError,
}

impl DeviceError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            DeviceError::BadBleState => 10001,
            DeviceError::DeviceDataNotCollected => 10002,
            DeviceError::WaitingForApduResponse => 10003,
            DeviceError::ApduPacketCorrupted => 10004,
            DeviceError::ApduDataNotFull => 10005,
            DeviceError::ApduErrorResponse => 10006,
            DeviceError::ApduWrongSequenceId => 10007,
            DeviceError::ApduSendingTimeout => 10008,
            DeviceError::OperationTimeout => 10009,
            DeviceError::DeviceShouldBeDisconnected => 10010,
            DeviceError::DeviceShouldBeConnected => 10011,
            DeviceError::TryLater => 10012,
            DeviceError::NonApduProcessingTimeout => 10013,
            DeviceError::DeviceWasDisconnected => 10014,
            DeviceError::UnknownError => 10099,
        }
    }
}
