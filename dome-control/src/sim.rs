//! In-memory dome hardware for tests and bench tooling.
//!
//! [`SimulatedDome`] implements [`DomeDriver`] with tick-stepped azimuth
//! motion and multi-cycle shutter transitions, plus fault and link-loss
//! injection. Tests call [`step`](SimulatedDome::step) once per simulated
//! poll period, exactly as the real dome advances between status queries.

use crate::convert::tick_distance;
use crate::driver::{
    AzimuthStatus, Direction, DomeDriver, DomeStatus, DriverError, DriverResult, ShutterStatus,
};

/// A command the simulated controller received, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    Ack,
    Goto {
        direction: Direction,
        target_ticks: u32,
    },
    AbortAzimuth,
    AbortShutter,
    Home,
    OpenFull,
    OpenUpper,
    Close,
    SetOperationPoint {
        move_before_operate: bool,
        ticks: u32,
    },
    SetTicksPerTurn(u32),
    Reconnect,
}

/// Simulated dome controller hardware.
pub struct SimulatedDome {
    ticks_per_turn: u32,
    ticks: u32,
    home_ticks: u32,
    shutter: ShutterStatus,
    azimuth: AzimuthStatus,
    target: Option<(Direction, u32)>,
    /// Ticks traveled per simulation step.
    azimuth_speed: u32,
    /// Steps a full shutter transition takes.
    shutter_travel: u32,
    shutter_countdown: u32,
    shutter_endpoint: Option<ShutterStatus>,
    fail_next: Option<DriverError>,
    link_down: bool,
    reconnect_ok: bool,
    commands: Vec<SimCommand>,
}

impl SimulatedDome {
    pub fn new(ticks_per_turn: u32) -> Self {
        Self {
            ticks_per_turn,
            ticks: 0,
            home_ticks: 0,
            shutter: ShutterStatus::Closed,
            azimuth: AzimuthStatus::Idle,
            target: None,
            azimuth_speed: 10,
            shutter_travel: 2,
            shutter_countdown: 0,
            shutter_endpoint: None,
            fail_next: None,
            link_down: false,
            reconnect_ok: true,
            commands: Vec::new(),
        }
    }

    /// Advance the simulation one poll period.
    pub fn step(&mut self) {
        if let Some((direction, target)) = self.target {
            let remaining = tick_distance(self.ticks, target, self.ticks_per_turn);
            if remaining <= self.azimuth_speed {
                self.ticks = target;
                self.target = None;
                self.azimuth = AzimuthStatus::Idle;
            } else {
                self.ticks = match direction {
                    Direction::Cw => (self.ticks + self.azimuth_speed) % self.ticks_per_turn,
                    Direction::Ccw => {
                        (self.ticks + self.ticks_per_turn - self.azimuth_speed)
                            % self.ticks_per_turn
                    }
                };
            }
        }
        if let Some(endpoint) = self.shutter_endpoint {
            if self.shutter_countdown <= 1 {
                self.shutter = endpoint;
                self.shutter_endpoint = None;
                self.shutter_countdown = 0;
            } else {
                self.shutter_countdown -= 1;
            }
        }
    }

    /// Teleport the dome to a tick position.
    pub fn set_position(&mut self, ticks: u32) {
        self.ticks = ticks % self.ticks_per_turn;
    }

    /// Stop azimuth motion where it stands, discarding the target.
    pub fn halt(&mut self) {
        self.target = None;
        self.azimuth = AzimuthStatus::Idle;
    }

    /// Force a raw shutter status, as manual operation would.
    pub fn set_shutter(&mut self, status: ShutterStatus) {
        self.shutter = status;
        self.shutter_endpoint = None;
        self.shutter_countdown = 0;
    }

    /// Force a raw azimuth status (e.g. a drive fault or manual rotation).
    pub fn set_azimuth_status(&mut self, status: AzimuthStatus) {
        self.azimuth = status;
    }

    /// Fail the next driver call with `error`, once.
    pub fn inject_error(&mut self, error: DriverError) {
        self.fail_next = Some(error);
    }

    /// Take the serial link down; every call fails with `LinkLost` until a
    /// successful reconnect.
    pub fn set_link_down(&mut self, down: bool) {
        self.link_down = down;
    }

    /// Whether reconnect attempts succeed.
    pub fn set_reconnect_ok(&mut self, ok: bool) {
        self.reconnect_ok = ok;
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn shutter(&self) -> ShutterStatus {
        self.shutter
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> &[SimCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn check_link(&mut self) -> DriverResult<()> {
        if self.link_down {
            return Err(DriverError::LinkLost);
        }
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        Ok(())
    }

    fn begin_shutter(&mut self, transit: ShutterStatus, endpoint: ShutterStatus) {
        if self.shutter == endpoint {
            return;
        }
        self.shutter = transit;
        self.shutter_endpoint = Some(endpoint);
        self.shutter_countdown = self.shutter_travel;
    }
}

impl DomeDriver for SimulatedDome {
    fn ack(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::Ack);
        Ok(())
    }

    fn status(&mut self) -> DriverResult<DomeStatus> {
        self.check_link()?;
        Ok(DomeStatus {
            shutter: self.shutter,
            azimuth: self.azimuth,
            ticks: self.ticks,
            home_ticks: self.home_ticks,
        })
    }

    fn goto_azimuth(&mut self, direction: Direction, target_ticks: u32) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::Goto {
            direction,
            target_ticks,
        });
        self.target = Some((direction, target_ticks % self.ticks_per_turn));
        self.azimuth = match direction {
            Direction::Cw => AzimuthStatus::MovingCw,
            Direction::Ccw => AzimuthStatus::MovingCcw,
        };
        Ok(())
    }

    fn abort_azimuth(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::AbortAzimuth);
        self.halt();
        Ok(())
    }

    fn abort_shutter(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::AbortShutter);
        if self.shutter_endpoint.is_some() {
            self.shutter = ShutterStatus::Aborted;
            self.shutter_endpoint = None;
            self.shutter_countdown = 0;
        }
        Ok(())
    }

    fn home_azimuth(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::Home);
        let cw_dist =
            (self.home_ticks + self.ticks_per_turn - self.ticks) % self.ticks_per_turn;
        let direction = if cw_dist <= self.ticks_per_turn / 2 {
            Direction::Cw
        } else {
            Direction::Ccw
        };
        self.target = Some((direction, self.home_ticks));
        self.azimuth = match direction {
            Direction::Cw => AzimuthStatus::MovingCw,
            Direction::Ccw => AzimuthStatus::MovingCcw,
        };
        Ok(())
    }

    fn open_shutter_full(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::OpenFull);
        self.begin_shutter(ShutterStatus::Opening, ShutterStatus::Open);
        Ok(())
    }

    fn open_shutter_upper(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::OpenUpper);
        self.begin_shutter(ShutterStatus::Opening, ShutterStatus::Open);
        Ok(())
    }

    fn close_shutter(&mut self) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::Close);
        self.begin_shutter(ShutterStatus::Closing, ShutterStatus::Closed);
        Ok(())
    }

    fn set_operation_point(&mut self, move_before_operate: bool, ticks: u32) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::SetOperationPoint {
            move_before_operate,
            ticks,
        });
        Ok(())
    }

    fn set_ticks_per_turn(&mut self, ticks: u32) -> DriverResult<()> {
        self.check_link()?;
        self.commands.push(SimCommand::SetTicksPerTurn(ticks));
        self.ticks_per_turn = ticks;
        Ok(())
    }

    fn reconnect(&mut self) -> DriverResult<()> {
        self.commands.push(SimCommand::Reconnect);
        if self.reconnect_ok {
            self.link_down = false;
            Ok(())
        } else {
            Err(DriverError::LinkLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn azimuth_motion_reaches_target() {
        let mut dome = SimulatedDome::new(360);
        dome.goto_azimuth(Direction::Cw, 45).unwrap();
        for _ in 0..10 {
            dome.step();
        }
        assert_eq!(dome.ticks(), 45);
        assert_eq!(dome.status().unwrap().azimuth, AzimuthStatus::Idle);
    }

    #[test]
    fn ccw_motion_wraps_through_zero() {
        let mut dome = SimulatedDome::new(360);
        dome.set_position(20);
        dome.goto_azimuth(Direction::Ccw, 340).unwrap();
        for _ in 0..10 {
            dome.step();
        }
        assert_eq!(dome.ticks(), 340);
    }

    #[test]
    fn shutter_opens_over_multiple_steps() {
        let mut dome = SimulatedDome::new(360);
        dome.open_shutter_full().unwrap();
        assert_eq!(dome.shutter(), ShutterStatus::Opening);
        dome.step();
        assert_eq!(dome.shutter(), ShutterStatus::Opening);
        dome.step();
        assert_eq!(dome.shutter(), ShutterStatus::Open);
    }

    #[test]
    fn injected_error_fires_once() {
        let mut dome = SimulatedDome::new(360);
        dome.inject_error(DriverError::BadChecksum);
        assert_eq!(dome.status().unwrap_err(), DriverError::BadChecksum);
        assert!(dome.status().is_ok());
    }

    #[test]
    fn link_down_until_reconnect() {
        let mut dome = SimulatedDome::new(360);
        dome.set_link_down(true);
        assert_eq!(dome.ack().unwrap_err(), DriverError::LinkLost);
        dome.reconnect().unwrap();
        assert!(dome.ack().is_ok());
    }

    #[test]
    fn abort_mid_transition_reports_aborted() {
        let mut dome = SimulatedDome::new(360);
        dome.open_shutter_full().unwrap();
        dome.step();
        dome.abort_shutter().unwrap();
        assert_eq!(dome.shutter(), ShutterStatus::Aborted);
    }
}
