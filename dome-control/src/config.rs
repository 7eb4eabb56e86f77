//! Dome geometry, shutter policy, and watchdog configuration.
//!
//! Values are validated before any hardware call; a rejected value leaves
//! both the configuration and the hardware untouched. Persistence of the
//! accepted configuration is the host adapter's job.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest encoder resolution the controller accepts.
pub const MIN_TICKS_PER_TURN: u32 = 100;
/// Largest encoder resolution the controller accepts.
pub const MAX_TICKS_PER_TURN: u32 = 2000;
/// Largest configurable watchdog timeout, in poll cycles.
pub const MAX_WATCHDOG_CYCLES: u32 = 3600;

/// How the shutter opens on an open command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ShutterOpenMode {
    /// Open both leaves.
    Full,
    /// Open the upper leaf only (e.g. for flats or high wind).
    UpperOnly,
}

/// Configuration owned by a dome controller instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomeConfig {
    /// Encoder ticks in one full dome rotation.
    pub ticks_per_turn: u32,
    /// Physical bearing of the home sensor (tick 0), degrees.
    pub home_azimuth_deg: f64,
    /// Azimuth the dome must reach before the shutter may operate.
    pub shutter_op_azimuth_deg: f64,
    /// Whether the firmware moves to the operation azimuth on its own
    /// before operating the shutter.
    pub move_before_shutter_op: bool,
    /// Poll cycles without a host command before the shutter is forced
    /// closed. 0 disables the watchdog.
    pub watchdog_timeout_cycles: u32,
    pub shutter_mode: ShutterOpenMode,
    pub close_shutter_on_park: bool,
    pub open_shutter_on_unpark: bool,
}

impl Default for DomeConfig {
    fn default() -> Self {
        Self {
            ticks_per_turn: 360,
            home_azimuth_deg: 0.0,
            shutter_op_azimuth_deg: 0.0,
            move_before_shutter_op: false,
            watchdog_timeout_cycles: 0,
            shutter_mode: ShutterOpenMode::Full,
            close_shutter_on_park: true,
            open_shutter_on_unpark: false,
        }
    }
}

impl DomeConfig {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ticks_per_turn(self.ticks_per_turn)?;
        validate_azimuth(self.home_azimuth_deg)?;
        validate_azimuth(self.shutter_op_azimuth_deg)?;
        validate_watchdog_timeout(self.watchdog_timeout_cycles)?;
        Ok(())
    }
}

/// A configuration value outside its allowed range.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("ticks per turn {0} outside 100..=2000")]
    TicksPerTurn(u32),

    #[error("azimuth {0} outside [0, 360)")]
    Azimuth(f64),

    #[error("watchdog timeout {0} exceeds 3600 cycles")]
    WatchdogTimeout(u32),
}

pub fn validate_ticks_per_turn(ticks: u32) -> Result<(), ConfigError> {
    if (MIN_TICKS_PER_TURN..=MAX_TICKS_PER_TURN).contains(&ticks) {
        Ok(())
    } else {
        Err(ConfigError::TicksPerTurn(ticks))
    }
}

pub fn validate_azimuth(degrees: f64) -> Result<(), ConfigError> {
    if (0.0..360.0).contains(&degrees) {
        Ok(())
    } else {
        Err(ConfigError::Azimuth(degrees))
    }
}

pub fn validate_watchdog_timeout(cycles: u32) -> Result<(), ConfigError> {
    if cycles <= MAX_WATCHDOG_CYCLES {
        Ok(())
    } else {
        Err(ConfigError::WatchdogTimeout(cycles))
    }
}
