//! Dome controller: per-cycle status reconciliation and compound
//! operations.
//!
//! [`DomeController`] owns the hardware driver, the configuration, and the
//! reconciliation state. The host adapter drives it from a single thread:
//! it calls [`poll`](DomeController::poll) once per polling period and the
//! command methods as host requests arrive, then drains the queued
//! [`DomeEvent`] notifications with [`take_events`](DomeController::take_events).
//! All cycle-counted timeouts are therefore multiples of the host's
//! polling period.
//!
//! No command propagates an error to the caller: failures surface as an
//! [`OpState::Alert`] result plus a queued event, and polling continues
//! until the host disconnects.

use tracing::{debug, error, info, warn};

use crate::config::{self, DomeConfig, ShutterOpenMode};
use crate::convert::{azimuth_to_ticks, ticks_to_azimuth};
use crate::driver::{Direction, DomeDriver, DriverError, ShutterStatus};
use crate::event::{DomeEvent, OpState};
use crate::retry::{retry, RetryPolicy};
use crate::state::{Arrival, AzimuthTracker, ShutterCommand, ShutterTracker};
use crate::watchdog::Watchdog;

/// Start or stop a directional (continuous) move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionCommand {
    Start,
    Stop,
}

/// Which park-related operation is waiting for the next confirmed arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingPark {
    None,
    Park,
    Unpark,
}

/// Pick the rotation direction that minimizes angular travel.
fn shortest_direction(current_deg: f64, target_deg: f64) -> Direction {
    if target_deg > current_deg {
        if target_deg - current_deg > 180.0 {
            Direction::Ccw
        } else {
            Direction::Cw
        }
    } else if current_deg - target_deg > 180.0 {
        Direction::Cw
    } else {
        Direction::Ccw
    }
}

/// The motion-control core of the dome.
pub struct DomeController<D: DomeDriver> {
    driver: D,
    config: DomeConfig,
    connected: bool,
    azimuth: AzimuthTracker,
    shutter: ShutterTracker,
    watchdog: Watchdog,
    park_azimuth_deg: f64,
    parked: bool,
    pending_park: PendingPark,
    home_pending: bool,
    events: Vec<DomeEvent>,
}

impl<D: DomeDriver> DomeController<D> {
    /// Build a controller around a driver. The configuration is validated
    /// up front; an out-of-range value is rejected before any hardware
    /// contact.
    pub fn new(driver: D, config: DomeConfig) -> Result<Self, config::ConfigError> {
        config.validate()?;
        let watchdog = Watchdog::new(config.watchdog_timeout_cycles);
        Ok(Self {
            driver,
            config,
            connected: false,
            azimuth: AzimuthTracker::new(),
            shutter: ShutterTracker::new(),
            watchdog,
            park_azimuth_deg: 0.0,
            parked: false,
            pending_park: PendingPark::None,
            home_pending: false,
            events: Vec::new(),
        })
    }

    /// Probe the device and start polling from a clean slate.
    pub fn connect(&mut self) -> Result<(), DriverError> {
        retry(&mut self.driver, RetryPolicy::motion(), |d| d.ack())?;
        self.reset_transient();
        self.connected = true;
        info!("dome controller connected");
        Ok(())
    }

    /// Stop reconciling. Transient motion state is discarded; the
    /// configuration and park data survive for the next connection.
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.reset_transient();
        info!("dome controller disconnected");
    }

    fn reset_transient(&mut self) {
        self.azimuth = AzimuthTracker::new();
        self.shutter = ShutterTracker::new();
        self.watchdog.reset();
        self.pending_park = PendingPark::None;
        self.home_pending = false;
        self.events.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn config(&self) -> &DomeConfig {
        &self.config
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn park_azimuth_deg(&self) -> f64 {
        self.park_azimuth_deg
    }

    /// Current azimuth in degrees, from the last polled encoder count.
    pub fn current_azimuth_deg(&self) -> f64 {
        ticks_to_azimuth(
            i64::from(self.azimuth.current_ticks()),
            self.config.home_azimuth_deg,
            self.config.ticks_per_turn,
        )
    }

    /// Drain the queued state-change notifications.
    pub fn take_events(&mut self) -> Vec<DomeEvent> {
        std::mem::take(&mut self.events)
    }

    /// Direct access to the driver, for bench tooling and tests.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    // ==================== Poll loop ====================

    /// Run one reconciliation cycle. Call once per polling period while
    /// connected; does nothing when disconnected.
    pub fn poll(&mut self) {
        if !self.connected {
            return;
        }

        // Single attempt: a failed poll must not delay the next one.
        let status = retry(&mut self.driver, RetryPolicy::poll(), |d| d.status());

        self.shutter.advance_timer();
        self.azimuth.advance_timer();
        self.watchdog.tick();

        let status = match status {
            Ok(status) => status,
            Err(err) => {
                debug!(error = %err, "status poll failed, skipping cycle");
                self.events.push(DomeEvent::PollError {
                    code: err.code(),
                    message: err.to_string(),
                });
                return;
            }
        };

        // Watchdog: force the shutter closed after prolonged host silence.
        // The edge is consumed only on a cycle with a valid status reply.
        if self.watchdog.expired_once() {
            if status.shutter == ShutterStatus::Closed {
                debug!("watchdog expired with shutter already closed");
            } else {
                warn!(
                    cycles = self.watchdog.cycles_since_command(),
                    "watchdog expired, forcing shutter closed"
                );
                match self.issue_shutter(ShutterCommand::Close) {
                    Ok(()) => self.events.push(DomeEvent::Shutter {
                        state: OpState::Busy,
                        message: "Closing shutter: watchdog timeout".to_string(),
                    }),
                    Err(err) => self.events.push(DomeEvent::Shutter {
                        state: OpState::Alert,
                        message: format!("Watchdog close failed: {err}"),
                    }),
                }
            }
        }

        self.shutter.reconcile(status.shutter, &mut self.events);

        self.azimuth.set_current_ticks(status.ticks);
        self.azimuth.publish_position(&self.config, &mut self.events);
        let arrival = self
            .azimuth
            .reconcile(status.azimuth, &self.config, &mut self.events);
        if arrival == Arrival::OnTarget {
            self.finish_arrival();
        }
    }

    /// Complete whatever compound operation was waiting on a settled move.
    fn finish_arrival(&mut self) {
        if self.home_pending {
            self.home_pending = false;
            info!("dome homed");
            self.events.push(DomeEvent::Home {
                state: OpState::Ok,
                message: "Dome is homed".to_string(),
            });
        }
        match self.pending_park {
            PendingPark::Park => {
                self.pending_park = PendingPark::None;
                self.parked = true;
                info!("dome parked");
                self.events.push(DomeEvent::Park {
                    state: OpState::Ok,
                    parked: true,
                    message: "Dome is parked".to_string(),
                });
            }
            PendingPark::Unpark => {
                self.pending_park = PendingPark::None;
                self.parked = false;
                info!("dome unparked");
                self.events.push(DomeEvent::Park {
                    state: OpState::Ok,
                    parked: false,
                    message: "Dome is unparked".to_string(),
                });
            }
            PendingPark::None => {}
        }
    }

    // ==================== Azimuth commands ====================

    /// Slew to an absolute azimuth, taking the shorter way around.
    pub fn slew_to_azimuth(&mut self, target_deg: f64) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("slew ignored: not connected");
            return OpState::Alert;
        }
        if let Err(err) = config::validate_azimuth(target_deg) {
            warn!(target_deg, "slew rejected: {err}");
            self.events.push(DomeEvent::Azimuth {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }

        let direction = shortest_direction(self.current_azimuth_deg(), target_deg);
        let target_ticks = azimuth_to_ticks(
            target_deg,
            self.config.home_azimuth_deg,
            self.config.ticks_per_turn,
        );
        match retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.goto_azimuth(direction, target_ticks)
        }) {
            Ok(()) => {
                debug!(target_deg, ?direction, target_ticks, "azimuth slew started");
                self.azimuth.begin_move(Some(target_ticks));
                self.events.push(DomeEvent::Azimuth {
                    state: OpState::Busy,
                    message: format!("Moving to {target_deg:.2} degrees"),
                });
                OpState::Busy
            }
            Err(err) => {
                error!(error = %err, "azimuth slew failed");
                self.events.push(DomeEvent::Azimuth {
                    state: OpState::Alert,
                    message: format!("Azimuth move failed: {err}"),
                });
                OpState::Alert
            }
        }
    }

    /// Start or stop a continuous rotation in the given direction. The
    /// start target is the point 180 degrees opposite the current
    /// position.
    pub fn move_dir(&mut self, direction: Direction, command: MotionCommand) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("move ignored: not connected");
            return OpState::Alert;
        }
        match command {
            MotionCommand::Start => {
                let current = self.current_azimuth_deg();
                let target = if current > 180.0 {
                    current - 180.0
                } else {
                    current + 180.0
                };
                let target_ticks = azimuth_to_ticks(
                    target,
                    self.config.home_azimuth_deg,
                    self.config.ticks_per_turn,
                );
                match retry(&mut self.driver, RetryPolicy::motion(), |d| {
                    d.goto_azimuth(direction, target_ticks)
                }) {
                    Ok(()) => {
                        debug!(?direction, target_ticks, "directional move started");
                        self.azimuth.begin_move(Some(target_ticks));
                        self.events.push(DomeEvent::Azimuth {
                            state: OpState::Busy,
                            message: format!("Moving {direction:?}"),
                        });
                        OpState::Busy
                    }
                    Err(err) => {
                        error!(error = %err, "directional move failed");
                        self.events.push(DomeEvent::Azimuth {
                            state: OpState::Alert,
                            message: format!("Azimuth move failed: {err}"),
                        });
                        OpState::Alert
                    }
                }
            }
            MotionCommand::Stop => {
                match retry(&mut self.driver, RetryPolicy::motion(), |d| {
                    d.abort_azimuth()
                }) {
                    Ok(()) => {
                        self.azimuth.stop();
                        self.events.push(DomeEvent::Azimuth {
                            state: OpState::Idle,
                            message: "Azimuth movement stopped".to_string(),
                        });
                        OpState::Ok
                    }
                    Err(err) => {
                        error!(error = %err, "azimuth stop failed");
                        self.events.push(DomeEvent::Azimuth {
                            state: OpState::Alert,
                            message: format!("Azimuth stop failed: {err}"),
                        });
                        OpState::Alert
                    }
                }
            }
        }
    }

    /// Abort azimuth and shutter motion. Reports failure when a shutter
    /// operation was interrupted mid-flight.
    pub fn abort(&mut self) -> bool {
        self.watchdog.reset();
        if !self.connected {
            warn!("abort ignored: not connected");
            return false;
        }

        if let Err(err) = retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.abort_azimuth()
        }) {
            error!(error = %err, "azimuth abort failed");
        }
        if let Err(err) = retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.abort_shutter()
        }) {
            error!(error = %err, "shutter abort failed");
        }

        self.azimuth.stop();
        self.events.push(DomeEvent::Azimuth {
            state: OpState::Idle,
            message: "Azimuth motion aborted".to_string(),
        });

        let shutter_interrupted = self.shutter.state() == OpState::Busy;
        if shutter_interrupted {
            self.shutter.mark_aborted();
            self.events.push(DomeEvent::Shutter {
                state: OpState::Alert,
                message: "Shutter operation aborted".to_string(),
            });
        }
        !shutter_interrupted
    }

    /// Start the firmware homing seek. Completion is detected by the
    /// azimuth tracker when the drive settles.
    pub fn home(&mut self) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("home ignored: not connected");
            return OpState::Alert;
        }

        let result = retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.home_azimuth()
        });
        // timer armed either way; the firmware may already be seeking
        self.azimuth.begin_move(None);
        match result {
            Ok(()) => {
                self.home_pending = true;
                info!("homing dome");
                self.events.push(DomeEvent::Home {
                    state: OpState::Busy,
                    message: "Homing dome".to_string(),
                });
                OpState::Busy
            }
            Err(err) => {
                error!(error = %err, "homing failed");
                self.events.push(DomeEvent::Home {
                    state: OpState::Alert,
                    message: format!("Error homing azimuth: {err}"),
                });
                OpState::Alert
            }
        }
    }

    // ==================== Shutter commands ====================

    /// Issue the raw shutter command for `command`, honoring the
    /// configured open mode, and arm the shutter tracker.
    fn issue_shutter(&mut self, command: ShutterCommand) -> Result<(), DriverError> {
        let result = match command {
            ShutterCommand::Close => retry(&mut self.driver, RetryPolicy::motion(), |d| {
                d.close_shutter()
            }),
            ShutterCommand::Open => match self.config.shutter_mode {
                ShutterOpenMode::Full => retry(&mut self.driver, RetryPolicy::motion(), |d| {
                    d.open_shutter_full()
                }),
                ShutterOpenMode::UpperOnly => {
                    retry(&mut self.driver, RetryPolicy::motion(), |d| {
                        d.open_shutter_upper()
                    })
                }
            },
        };
        self.shutter.begin(command);
        if let Err(err) = result {
            self.shutter.fail();
            return Err(err);
        }
        Ok(())
    }

    /// Open or close the shutter.
    pub fn control_shutter(&mut self, command: ShutterCommand) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("shutter command ignored: not connected");
            return OpState::Alert;
        }

        match self.issue_shutter(command) {
            Ok(()) => {
                let message = match command {
                    ShutterCommand::Open => "Shutter is opening",
                    ShutterCommand::Close => "Shutter is closing",
                };
                debug!(?command, "shutter command issued");
                self.events.push(DomeEvent::Shutter {
                    state: OpState::Busy,
                    message: message.to_string(),
                });
                OpState::Busy
            }
            Err(err) => {
                error!(error = %err, ?command, "shutter command failed");
                self.events.push(DomeEvent::Shutter {
                    state: OpState::Alert,
                    message: format!("Shutter command failed: {err}"),
                });
                OpState::Alert
            }
        }
    }

    // ==================== Park / unpark ====================

    /// Slew to the stored park position; per policy, also close the
    /// shutter. Completion is confirmed by the arrival path.
    pub fn park(&mut self) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("park ignored: not connected");
            return OpState::Alert;
        }
        if self.parked {
            self.events.push(DomeEvent::Park {
                state: OpState::Ok,
                parked: true,
                message: "Dome already parked".to_string(),
            });
            return OpState::Ok;
        }

        info!(azimuth = self.park_azimuth_deg, "parking dome");
        self.slew_to_azimuth(self.park_azimuth_deg);
        self.pending_park = PendingPark::Park;

        if self.config.close_shutter_on_park {
            info!("closing shutter on parking");
            match self.issue_shutter(ShutterCommand::Close) {
                Ok(()) => self.events.push(DomeEvent::Shutter {
                    state: OpState::Busy,
                    message: "Closing shutter on parking".to_string(),
                }),
                Err(err) => self.events.push(DomeEvent::Shutter {
                    state: OpState::Alert,
                    message: format!("Shutter close on park failed: {err}"),
                }),
            }
        }

        self.events.push(DomeEvent::Park {
            state: OpState::Busy,
            parked: false,
            message: "Parking dome".to_string(),
        });
        OpState::Busy
    }

    /// Leave the parked state: home the dome and, per policy, open the
    /// shutter. The parked flag drops immediately so the moves are
    /// permitted.
    pub fn unpark(&mut self) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("unpark ignored: not connected");
            return OpState::Alert;
        }

        self.parked = false;
        self.pending_park = PendingPark::Unpark;

        if let Err(err) = retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.home_azimuth()
        }) {
            error!(error = %err, "homing on unpark failed");
        }
        self.azimuth.begin_move(None);

        if self.config.open_shutter_on_unpark {
            info!("opening shutter on unparking");
            match self.issue_shutter(ShutterCommand::Open) {
                Ok(()) => self.events.push(DomeEvent::Shutter {
                    state: OpState::Busy,
                    message: "Opening shutter on unparking".to_string(),
                }),
                Err(err) => self.events.push(DomeEvent::Shutter {
                    state: OpState::Alert,
                    message: format!("Shutter open on unpark failed: {err}"),
                }),
            }
        }

        self.events.push(DomeEvent::Park {
            state: OpState::Busy,
            parked: false,
            message: "Unparking dome".to_string(),
        });
        OpState::Busy
    }

    // ==================== Configuration commands ====================

    /// Program the shutter-operation point: the azimuth the dome must
    /// reach before the shutter may operate, and whether the firmware
    /// moves there on its own. No-op when nothing changed.
    pub fn configure_shutter_operation(
        &mut self,
        move_before_operate: bool,
        azimuth_deg: f64,
    ) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("shutter operation config ignored: not connected");
            return OpState::Alert;
        }
        if let Err(err) = config::validate_azimuth(azimuth_deg) {
            warn!(azimuth_deg, "shutter operation azimuth rejected: {err}");
            self.events.push(DomeEvent::ConfigAck {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }
        if move_before_operate == self.config.move_before_shutter_op
            && azimuth_deg == self.config.shutter_op_azimuth_deg
        {
            return OpState::Ok;
        }

        let ticks = azimuth_to_ticks(
            azimuth_deg,
            self.config.home_azimuth_deg,
            self.config.ticks_per_turn,
        );
        match retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.set_operation_point(move_before_operate, ticks)
        }) {
            Ok(()) => {
                self.config.move_before_shutter_op = move_before_operate;
                self.config.shutter_op_azimuth_deg = azimuth_deg;
                info!(move_before_operate, azimuth_deg, ticks, "shutter operation point set");
                self.events.push(DomeEvent::ConfigAck {
                    state: OpState::Ok,
                    message: "New shutter operation point set".to_string(),
                });
                OpState::Ok
            }
            Err(err) => {
                error!(error = %err, "setting shutter operation point failed");
                self.events.push(DomeEvent::ConfigAck {
                    state: OpState::Alert,
                    message: format!("Shutter operation point failed: {err}"),
                });
                OpState::Alert
            }
        }
    }

    /// Program the encoder resolution. Subsequent tick/degree conversions
    /// use the new value.
    pub fn set_ticks_per_turn(&mut self, ticks: u32) -> OpState {
        self.watchdog.reset();
        if !self.connected {
            warn!("ticks per turn ignored: not connected");
            return OpState::Alert;
        }
        if let Err(err) = config::validate_ticks_per_turn(ticks) {
            warn!(ticks, "ticks per turn rejected: {err}");
            self.events.push(DomeEvent::ConfigAck {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }

        match retry(&mut self.driver, RetryPolicy::motion(), |d| {
            d.set_ticks_per_turn(ticks)
        }) {
            Ok(()) => {
                self.config.ticks_per_turn = ticks;
                info!(ticks, "ticks per turn set");
                self.events.push(DomeEvent::ConfigAck {
                    state: OpState::Ok,
                    message: format!("New ticks per turn set: {ticks}"),
                });
                OpState::Ok
            }
            Err(err) => {
                error!(error = %err, "setting ticks per turn failed");
                self.events.push(DomeEvent::ConfigAck {
                    state: OpState::Alert,
                    message: format!("Ticks per turn failed: {err}"),
                });
                OpState::Alert
            }
        }
    }

    /// Set the physical bearing of the home sensor. Local only; no
    /// hardware round-trip.
    pub fn set_home_azimuth(&mut self, degrees: f64) -> OpState {
        self.watchdog.reset();
        if let Err(err) = config::validate_azimuth(degrees) {
            warn!(degrees, "home azimuth rejected: {err}");
            self.events.push(DomeEvent::ConfigAck {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }
        self.config.home_azimuth_deg = degrees;
        info!(degrees, "home azimuth set");
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: format!("New home azimuth set: {degrees:.2}"),
        });
        OpState::Ok
    }

    /// Set the watchdog timeout in poll cycles; 0 disables it.
    pub fn set_watchdog_timeout(&mut self, cycles: u32) -> OpState {
        self.watchdog.reset();
        if let Err(err) = config::validate_watchdog_timeout(cycles) {
            warn!(cycles, "watchdog timeout rejected: {err}");
            self.events.push(DomeEvent::ConfigAck {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }
        self.config.watchdog_timeout_cycles = cycles;
        self.watchdog.set_timeout(cycles);
        info!(cycles, "watchdog timeout set");
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: format!("New watchdog timeout set: {cycles} cycles"),
        });
        OpState::Ok
    }

    /// Choose how the shutter opens on an open command.
    pub fn set_shutter_mode(&mut self, mode: ShutterOpenMode) -> OpState {
        self.watchdog.reset();
        self.config.shutter_mode = mode;
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: format!("Shutter open mode set: {mode}"),
        });
        OpState::Ok
    }

    /// Choose whether parking closes the shutter and unparking opens it.
    pub fn set_park_policy(&mut self, close_on_park: bool, open_on_unpark: bool) -> OpState {
        self.watchdog.reset();
        self.config.close_shutter_on_park = close_on_park;
        self.config.open_shutter_on_unpark = open_on_unpark;
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: "Park shutter policy set".to_string(),
        });
        OpState::Ok
    }

    /// Store an explicit park azimuth.
    pub fn set_park_azimuth(&mut self, degrees: f64) -> OpState {
        self.watchdog.reset();
        if let Err(err) = config::validate_azimuth(degrees) {
            warn!(degrees, "park azimuth rejected: {err}");
            self.events.push(DomeEvent::ConfigAck {
                state: OpState::Alert,
                message: err.to_string(),
            });
            return OpState::Alert;
        }
        self.park_azimuth_deg = degrees;
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: format!("New park azimuth set: {degrees:.2}"),
        });
        OpState::Ok
    }

    /// Store the current position as the park azimuth.
    pub fn set_park_current(&mut self) -> OpState {
        self.watchdog.reset();
        self.park_azimuth_deg = self.current_azimuth_deg();
        self.events.push(DomeEvent::ConfigAck {
            state: OpState::Ok,
            message: format!("New park azimuth set: {:.2}", self.park_azimuth_deg),
        });
        OpState::Ok
    }
}
