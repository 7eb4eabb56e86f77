//! Motion-control core for an observatory dome controller.
//!
//! This crate reconciles commanded motion (azimuth rotation, shutter
//! open/close) against periodically polled hardware status, retries failed
//! hardware commands with reconnect-on-link-loss semantics, and enforces
//! the safety policies: watchdog auto-close, shutter-operation azimuth,
//! park and unpark sequencing.
//!
//! The serial protocol to the physical controller lives behind the
//! [`DomeDriver`] trait; a host adapter owns a [`DomeController`], calls
//! [`poll`](DomeController::poll) once per polling period plus the command
//! methods as requests arrive, and drains [`DomeEvent`] notifications to
//! forward to its own protocol.
//!
//! Everything runs on one thread: hardware calls are blocking round-trips
//! over a shared serial channel, only one command is ever in flight, and
//! all timeouts are counted in poll cycles rather than wall-clock time.
//!
//! # Example
//!
//! ```
//! use dome_control::{DomeConfig, DomeController, SimulatedDome};
//!
//! let mut dome = DomeController::new(SimulatedDome::new(360), DomeConfig::default())?;
//! dome.connect()?;
//!
//! dome.slew_to_azimuth(120.0);
//! for _ in 0..20 {
//!     dome.driver_mut().step(); // the real dome moves on its own
//!     dome.poll();
//! }
//! for event in dome.take_events() {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod controller;
pub mod convert;
pub mod driver;
pub mod event;
pub mod retry;
pub mod sim;
pub mod state;
pub mod watchdog;

pub use config::{ConfigError, DomeConfig, ShutterOpenMode};
pub use controller::{DomeController, MotionCommand};
pub use convert::{azimuth_to_ticks, tick_distance, ticks_to_azimuth, AZIMUTH_TOLERANCE_TICKS};
pub use driver::{
    AzimuthStatus, Direction, DomeDriver, DomeStatus, DriverError, DriverResult, ShutterStatus,
};
pub use event::{DomeEvent, OpState};
pub use retry::{retry, RetryPolicy};
pub use sim::{SimCommand, SimulatedDome};
pub use state::{Arrival, AzimuthTracker, ShutterCommand, ShutterTracker};
pub use watchdog::Watchdog;
