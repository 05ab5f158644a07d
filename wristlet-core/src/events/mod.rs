// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event System
//!
//! Typed publish/subscribe channel connecting the command execution engine,
//! the sync request queue, and the host application. All cross-component
//! communication travels through here or through explicit call/return.

#[cfg(feature = "testing")]
pub mod channel;
#[cfg(not(feature = "testing"))]
mod channel;

#[cfg(feature = "testing")]
pub mod event;
#[cfg(not(feature = "testing"))]
mod event;

pub use channel::{
    EventChannel, EventHandler, ExecutionContext, InlineContext, SubscriptionToken,
};
pub use event::{EventKind, WristletEvent};
