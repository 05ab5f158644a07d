// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Coordination Module
//!
//! Serializes and de-duplicates competing synchronization requests for a
//! user/device pair. The queue decides when a sync starts, listens to the
//! sync manager's outcome events, and fans a shared outcome out to requests
//! a completed sync has made obsolete.

#[cfg(feature = "testing")]
pub mod manager;
#[cfg(not(feature = "testing"))]
mod manager;

#[cfg(feature = "testing")]
pub mod mock;
#[cfg(not(feature = "testing"))]
mod mock;

#[cfg(feature = "testing")]
pub mod queue;
#[cfg(not(feature = "testing"))]
mod queue;

#[cfg(feature = "testing")]
pub mod request;
#[cfg(not(feature = "testing"))]
mod request;

// Manager seam
pub use manager::{SyncError, SyncManager};

// Mock manager for testing
pub use mock::MockSyncManager;

// Request model
pub use request::{RequestState, SyncOutcome, SyncRequest};

// Queue
pub use queue::{QueueConfig, SyncCompletion, SyncRequestQueue, DEFAULT_ADVANCE_DELAY};
