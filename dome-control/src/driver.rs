//! Hardware interface to the dome azimuth/shutter controller.
//!
//! The byte-level serial protocol (framing, checksums, port I/O) lives in a
//! lower-level driver crate behind the [`DomeDriver`] trait. This module
//! defines that seam: the discrete operations the controller firmware
//! supports, the raw status words it reports, and the fixed error-code
//! table shared by every operation.
//!
//! All calls are blocking, synchronous round-trips over a shared serial
//! channel. Only one command is ever in flight (see the crate docs on the
//! concurrency model), so the trait takes `&mut self` throughout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rotation direction for azimuth moves.
///
/// `Cw` rotates with increasing azimuth (north → east), `Ccw` with
/// decreasing azimuth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Cw,
    Ccw,
}

/// Raw shutter status word reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ShutterStatus {
    Closed,
    Opening,
    Open,
    Closing,
    /// Shutter motion was stopped by the controller firmware itself.
    Aborted,
    Error,
}

/// Raw azimuth drive status word reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum AzimuthStatus {
    Idle,
    MovingCw,
    MovingCcw,
    Error,
}

impl AzimuthStatus {
    /// True for either rotation direction.
    pub fn is_moving(self) -> bool {
        matches!(self, AzimuthStatus::MovingCw | AzimuthStatus::MovingCcw)
    }
}

/// One complete status reply from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomeStatus {
    pub shutter: ShutterStatus,
    pub azimuth: AzimuthStatus,
    /// Current encoder position, in `[0, ticks_per_turn)`.
    pub ticks: u32,
    /// Encoder position of the home sensor, as stored by the firmware.
    pub home_ticks: u32,
}

/// Errors reported by the hardware link.
///
/// The controller firmware reports failures as small negative integer
/// codes; code 0 means success. The variants below are that table.
/// [`DriverError::LinkLost`] (`-5`) is special-cased by the retry layer:
/// it triggers a reconnect attempt before any further retries.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// No reply within the read timeout.
    #[error("no response from dome controller")]
    NoResponse,

    /// Reply header declared an impossible payload length.
    #[error("invalid declared message length")]
    BadLength,

    /// Reply ended before the declared payload length.
    #[error("message too short")]
    ShortRead,

    /// Reply checksum did not match its payload.
    #[error("checksum mismatch")]
    BadChecksum,

    /// The serial port went away (e.g. a USB adapter re-enumerated).
    #[error("serial link lost")]
    LinkLost,

    /// Reply was well-formed but not the answer to the command sent.
    #[error("unexpected response")]
    BadResponse,
}

impl DriverError {
    /// The wire-level error code for this error.
    pub fn code(self) -> i32 {
        match self {
            DriverError::NoResponse => -1,
            DriverError::BadLength => -2,
            DriverError::ShortRead => -3,
            DriverError::BadChecksum => -4,
            DriverError::LinkLost => -5,
            DriverError::BadResponse => -6,
        }
    }

    /// Map a wire-level code back to an error. `None` for 0 (success) or
    /// any code outside the table.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(DriverError::NoResponse),
            -2 => Some(DriverError::BadLength),
            -3 => Some(DriverError::ShortRead),
            -4 => Some(DriverError::BadChecksum),
            -5 => Some(DriverError::LinkLost),
            -6 => Some(DriverError::BadResponse),
            _ => None,
        }
    }

    /// True for the dedicated link-loss code that warrants a reconnect.
    pub fn is_link_lost(self) -> bool {
        matches!(self, DriverError::LinkLost)
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// The discrete hardware operations of the dome controller.
///
/// Implemented by the serial protocol layer for the real device and by
/// [`SimulatedDome`](crate::sim::SimulatedDome) for tests and bench use.
pub trait DomeDriver {
    /// Liveness probe, used once at connect time.
    fn ack(&mut self) -> DriverResult<()>;

    /// Query shutter status, azimuth status, and encoder positions.
    fn status(&mut self) -> DriverResult<DomeStatus>;

    /// Start an azimuth move toward `target_ticks` in the given direction.
    fn goto_azimuth(&mut self, direction: Direction, target_ticks: u32) -> DriverResult<()>;

    /// Stop azimuth motion.
    fn abort_azimuth(&mut self) -> DriverResult<()>;

    /// Stop shutter motion.
    fn abort_shutter(&mut self) -> DriverResult<()>;

    /// Start the firmware homing sequence (seek the home sensor).
    fn home_azimuth(&mut self) -> DriverResult<()>;

    /// Open both shutter leaves fully.
    fn open_shutter_full(&mut self) -> DriverResult<()>;

    /// Open the upper shutter leaf only.
    fn open_shutter_upper(&mut self) -> DriverResult<()>;

    /// Close the shutter.
    fn close_shutter(&mut self) -> DriverResult<()>;

    /// Store the shutter-operation point in the firmware: the azimuth (in
    /// ticks) the dome must reach before the shutter may operate, and
    /// whether the firmware should move there on its own first.
    fn set_operation_point(&mut self, move_before_operate: bool, ticks: u32) -> DriverResult<()>;

    /// Program the encoder resolution.
    fn set_ticks_per_turn(&mut self, ticks: u32) -> DriverResult<()>;

    /// Try to reopen the serial link after [`DriverError::LinkLost`].
    fn reconnect(&mut self) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        for code in -6..=-1 {
            let err = DriverError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn success_and_unknown_codes_have_no_error() {
        assert_eq!(DriverError::from_code(0), None);
        assert_eq!(DriverError::from_code(-7), None);
        assert_eq!(DriverError::from_code(1), None);
    }

    #[test]
    fn only_link_lost_triggers_reconnect() {
        assert!(DriverError::LinkLost.is_link_lost());
        assert!(!DriverError::NoResponse.is_link_lost());
        assert!(!DriverError::BadChecksum.is_link_lost());
    }

    #[test]
    fn messages_are_stable() {
        assert_eq!(DriverError::LinkLost.to_string(), "serial link lost");
        assert_eq!(
            DriverError::NoResponse.to_string(),
            "no response from dome controller"
        );
    }
}
