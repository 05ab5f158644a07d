//! Wristlet Core Library
//!
//! Coordinates synchronization sessions between a host application, a
//! user's account state, and a wearable secure-element payment device, and
//! drives the APDU command protocol over the device's transport link.

pub mod device;
pub mod events;
pub mod sync;

pub use device::{
    ApduCommand, ApduPackage, ApduResponse, CommandExecutor, CommitState, ConnectionState, Device,
    DeviceError, DeviceTransport, ExecutorConfig, IdVerificationResponse, MockDeviceTransport,
    NonApduCommit, ResponseState, TransportCapabilities, TransportResult,
};
pub use events::{
    EventChannel, EventHandler, EventKind, ExecutionContext, InlineContext, SubscriptionToken,
    WristletEvent,
};
pub use sync::{
    MockSyncManager, QueueConfig, RequestState, SyncError, SyncManager, SyncOutcome, SyncRequest,
    SyncRequestQueue,
};
