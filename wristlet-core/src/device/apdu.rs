//! APDU and Commit Data Model
//!
//! Thin records the command execution engine operates on. Wire encodings
//! belong to the transport; these types never interpret payload bytes
//! beyond the trailing APDU status word.

use serde::{Deserialize, Serialize};

use super::error::DeviceError;

/// Length of the trailing APDU status word.
const APDU_STATUS_LEN: usize = 2;

/// Status word signalling success (SW1=0x90, SW2=0x00).
const APDU_STATUS_SUCCESS: [u8; 2] = [0x90, 0x00];

/// Terminal state of an APDU command or package execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseState {
    /// Executed and answered with a success status word.
    Processed,
    /// Answered, but with an error status or a malformed response.
    Error,
    /// Never reached the device (rejected locally or link failure).
    Failed,
    /// Timed out waiting for the device.
    Expired,
}

/// Terminal state of a non-APDU commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitState {
    /// The transport applied the commit.
    Processed,
    /// The transport declares no commit hook; nothing to do.
    Skipped,
    /// The commit could not be applied.
    Failed,
}

/// A single APDU command addressed to the device's secure element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduCommand {
    /// Sequence id within the package; echoed by the response.
    pub sequence_id: u16,
    /// Raw command bytes.
    pub command: Vec<u8>,
    /// Whether a package run continues past a failure of this command.
    pub continue_on_failure: bool,
    /// Server-assigned command id, if any.
    pub command_id: Option<String>,
}

impl ApduCommand {
    /// Creates a command from raw bytes.
    pub fn new(sequence_id: u16, command: Vec<u8>) -> Self {
        ApduCommand {
            sequence_id,
            command,
            continue_on_failure: false,
            command_id: None,
        }
    }

    /// Parses the command bytes from a hex string.
    ///
    /// APDUs are conventionally written in hex; commit payloads carry them
    /// that way.
    pub fn from_hex(sequence_id: u16, hex_str: &str) -> Result<Self, DeviceError> {
        let command = hex::decode(hex_str).map_err(|_| DeviceError::ApduPacketCorrupted)?;
        Ok(ApduCommand::new(sequence_id, command))
    }

    /// Command bytes rendered as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.command)
    }
}

/// A response returned by the secure element for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduResponse {
    /// Sequence id of the command this response answers.
    pub sequence_id: u16,
    /// Raw response bytes, status word last.
    pub data: Vec<u8>,
}

impl ApduResponse {
    /// Creates a response from raw bytes.
    pub fn new(sequence_id: u16, data: Vec<u8>) -> Self {
        ApduResponse { sequence_id, data }
    }

    /// Creates a bare success response (status word only).
    pub fn success(sequence_id: u16) -> Self {
        ApduResponse::new(sequence_id, APDU_STATUS_SUCCESS.to_vec())
    }

    /// Trailing status word, if the response is long enough to carry one.
    pub fn status_word(&self) -> Option<[u8; 2]> {
        if self.data.len() < APDU_STATUS_LEN {
            return None;
        }
        let tail = &self.data[self.data.len() - APDU_STATUS_LEN..];
        Some([tail[0], tail[1]])
    }

    /// True when the status word signals success.
    pub fn is_success(&self) -> bool {
        self.status_word() == Some(APDU_STATUS_SUCCESS)
    }

    /// Checks the response shape against the command it answers.
    pub fn validate(&self, expected_sequence: u16) -> Result<(), DeviceError> {
        if self.sequence_id != expected_sequence {
            return Err(DeviceError::ApduWrongSequenceId);
        }
        if self.data.len() < APDU_STATUS_LEN {
            return Err(DeviceError::ApduDataNotFull);
        }
        Ok(())
    }
}

/// An ordered set of APDU commands executed as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApduPackage {
    /// Server-assigned package id.
    pub package_id: String,
    /// Commands in execution order.
    pub commands: Vec<ApduCommand>,
}

impl ApduPackage {
    /// Creates a package.
    pub fn new(package_id: &str, commands: Vec<ApduCommand>) -> Self {
        ApduPackage {
            package_id: package_id.to_string(),
            commands,
        }
    }

    /// Number of commands in the package.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when the package carries no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A commit applied through the software-only path.
///
/// Commits arrive from the remote service as JSON documents; the engine
/// hands them to the transport without interpreting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonApduCommit {
    /// Server-assigned commit id.
    pub commit_id: String,
    /// Opaque commit document.
    pub payload: serde_json::Value,
}

impl NonApduCommit {
    /// Creates a commit record.
    pub fn new(commit_id: &str, payload: serde_json::Value) -> Self {
        NonApduCommit {
            commit_id: commit_id.to_string(),
            payload,
        }
    }
}
