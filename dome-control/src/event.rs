//! State-change notifications delivered to the host adapter.
//!
//! Every user-visible transition is a [`DomeEvent`] carrying a status tier
//! and a human-readable message. Events are edge-triggered: a stable state
//! is reported once, not on every poll cycle. The controller queues them
//! internally; the adapter drains the queue after each call and translates
//! the payloads into whatever its host protocol wants.

use serde::{Deserialize, Serialize};

/// Public status tier attached to every operation and notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum OpState {
    /// Nothing commanded, nothing in progress.
    Idle,
    /// A commanded operation is in progress.
    Busy,
    /// The last commanded operation completed as expected.
    Ok,
    /// Fault, anomaly, or rejected command.
    Alert,
}

/// A single state-change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomeEvent {
    /// Azimuth position changed (degrees). Published only on change.
    AzimuthPosition { degrees: f64 },
    /// Azimuth operation state changed.
    Azimuth { state: OpState, message: String },
    /// Shutter operation state changed.
    Shutter { state: OpState, message: String },
    /// Home operation state changed.
    Home { state: OpState, message: String },
    /// Park/unpark state changed.
    Park {
        state: OpState,
        parked: bool,
        message: String,
    },
    /// A configuration command was accepted or rejected.
    ConfigAck { state: OpState, message: String },
    /// The periodic status query failed this cycle.
    PollError { code: i32, message: String },
}
