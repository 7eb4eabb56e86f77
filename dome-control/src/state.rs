//! Shutter and azimuth status reconciliation.
//!
//! Each poll cycle the raw hardware status is reduced against the
//! commanded intent and the per-movement cycle timer into a public
//! [`OpState`], detecting stalls, manual interference, and completed
//! moves. Transitions are edge-triggered: a notification is emitted when
//! the public state or the commanded intent changes, never repeatedly for
//! a stable state.
//!
//! A deliberate policy throughout: when the hardware is observed doing
//! something that was never commanded (a manually opened shutter, a dome
//! rotating by hand), the commanded intent is corrected to match the
//! observed reality after the anomaly is reported. The hardware is the
//! source of truth once a human has touched it.

use serde::{Deserialize, Serialize};

use crate::config::DomeConfig;
use crate::convert::{tick_distance, ticks_to_azimuth, AZIMUTH_TOLERANCE_TICKS};
use crate::driver::{AzimuthStatus, ShutterStatus};
use crate::event::{DomeEvent, OpState};

/// Poll cycles a commanded shutter operation may show no progress before
/// the tracker raises an alert.
pub const SHUTTER_STALL_CYCLES: u32 = 4;

/// Poll cycles the azimuth drive must read idle before a move is judged
/// settled (arrival is evaluated strictly after this many cycles).
pub const AZIMUTH_SETTLE_CYCLES: u32 = 3;

/// Direction the shutter was last commanded to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterCommand {
    Open,
    Close,
}

fn shutter_event(state: OpState, message: &str) -> DomeEvent {
    DomeEvent::Shutter {
        state,
        message: message.to_string(),
    }
}

fn azimuth_event(state: OpState, message: &str) -> DomeEvent {
    DomeEvent::Azimuth {
        state,
        message: message.to_string(),
    }
}

/// Reduces raw shutter status, commanded intent, and elapsed cycles into
/// the public shutter state.
#[derive(Debug, Clone)]
pub struct ShutterTracker {
    commanded: Option<ShutterCommand>,
    elapsed: Option<u32>,
    state: OpState,
}

impl ShutterTracker {
    pub fn new() -> Self {
        Self {
            commanded: None,
            elapsed: None,
            state: OpState::Idle,
        }
    }

    /// Record a freshly issued shutter command and arm the movement timer.
    pub fn begin(&mut self, command: ShutterCommand) {
        self.commanded = Some(command);
        self.elapsed = Some(0);
        self.state = OpState::Busy;
    }

    /// The issued command could not be delivered.
    pub fn fail(&mut self) {
        self.state = OpState::Alert;
    }

    /// An abort interrupted the operation mid-flight.
    pub fn mark_aborted(&mut self) {
        self.state = OpState::Alert;
        self.elapsed = None;
    }

    /// Advance the movement timer by one poll cycle, if one is running.
    pub fn advance_timer(&mut self) {
        if let Some(elapsed) = self.elapsed {
            self.elapsed = Some(elapsed.saturating_add(1));
        }
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn commanded(&self) -> Option<ShutterCommand> {
        self.commanded
    }

    pub fn elapsed(&self) -> Option<u32> {
        self.elapsed
    }

    /// Reconcile one raw status reading against the commanded intent.
    pub fn reconcile(&mut self, status: ShutterStatus, events: &mut Vec<DomeEvent>) {
        match status {
            ShutterStatus::Closed => {
                if self.commanded == Some(ShutterCommand::Close) {
                    if matches!(self.state, OpState::Busy | OpState::Alert) {
                        self.state = OpState::Ok;
                        self.elapsed = None;
                        events.push(shutter_event(OpState::Ok, "Shutter is closed"));
                    }
                } else if let Some(elapsed) = self.elapsed {
                    // an open is outstanding but the leaves never moved
                    if elapsed >= SHUTTER_STALL_CYCLES && self.state != OpState::Alert {
                        self.state = OpState::Alert;
                        events.push(shutter_event(OpState::Alert, "Shutter still closed"));
                    }
                } else {
                    // closed by hand while we were not moving it
                    self.state = OpState::Idle;
                    self.commanded = Some(ShutterCommand::Close);
                    events.push(shutter_event(OpState::Idle, "Unexpected shutter closed"));
                }
            }
            ShutterStatus::Opening => {
                if self.commanded != Some(ShutterCommand::Open) {
                    self.state = OpState::Alert;
                    self.commanded = Some(ShutterCommand::Open);
                    events.push(shutter_event(OpState::Alert, "Unexpected shutter opening"));
                } else if self.elapsed.is_none() {
                    // our command, but the timer never started
                    self.state = OpState::Alert;
                    self.elapsed = Some(0);
                    events.push(shutter_event(OpState::Alert, "Unexpected shutter opening"));
                } else if self.state == OpState::Alert {
                    self.state = OpState::Busy;
                    events.push(shutter_event(OpState::Busy, "Shutter is opening"));
                }
            }
            ShutterStatus::Open => {
                if self.commanded == Some(ShutterCommand::Open) {
                    if matches!(self.state, OpState::Busy | OpState::Alert) {
                        self.state = OpState::Ok;
                        self.elapsed = None;
                        events.push(shutter_event(OpState::Ok, "Shutter is open"));
                    }
                } else if let Some(elapsed) = self.elapsed {
                    if elapsed >= SHUTTER_STALL_CYCLES && self.state != OpState::Alert {
                        self.state = OpState::Alert;
                        events.push(shutter_event(OpState::Alert, "Shutter still open"));
                    }
                } else {
                    // opened by hand while we were not moving it
                    self.state = OpState::Idle;
                    self.commanded = Some(ShutterCommand::Open);
                    events.push(shutter_event(OpState::Idle, "Unexpected shutter open"));
                }
            }
            ShutterStatus::Closing => {
                if self.commanded != Some(ShutterCommand::Close) {
                    self.state = OpState::Alert;
                    self.commanded = Some(ShutterCommand::Close);
                    events.push(shutter_event(OpState::Alert, "Unexpected shutter closing"));
                } else if self.elapsed.is_none() {
                    self.state = OpState::Alert;
                    self.elapsed = Some(0);
                    events.push(shutter_event(OpState::Alert, "Unexpected shutter closing"));
                } else if self.state == OpState::Alert {
                    self.state = OpState::Busy;
                    events.push(shutter_event(OpState::Busy, "Shutter is closing"));
                }
            }
            ShutterStatus::Error => {
                if self.state != OpState::Alert || self.commanded.is_some() {
                    self.state = OpState::Alert;
                    self.commanded = None;
                    events.push(shutter_event(OpState::Alert, "Shutter error"));
                }
            }
            ShutterStatus::Aborted => {
                if self.elapsed.is_some() {
                    self.state = OpState::Alert;
                    self.commanded = None;
                    self.elapsed = None;
                    events.push(shutter_event(OpState::Alert, "Shutter aborted"));
                }
            }
        }
    }
}

impl Default for ShutterTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one azimuth reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// No settled move this cycle.
    None,
    /// A move settled within tolerance (or a home/park seek completed).
    OnTarget,
    /// A move settled outside tolerance.
    Missed,
}

/// Reduces raw azimuth status, target, and elapsed cycles into the public
/// azimuth state; detects unexpected motion and confirms arrivals.
#[derive(Debug, Clone)]
pub struct AzimuthTracker {
    current_ticks: u32,
    target_ticks: Option<u32>,
    elapsed: Option<u32>,
    state: OpState,
    last_published_deg: Option<f64>,
}

impl AzimuthTracker {
    pub fn new() -> Self {
        Self {
            current_ticks: 0,
            target_ticks: None,
            elapsed: None,
            state: OpState::Idle,
            last_published_deg: None,
        }
    }

    /// Record a freshly issued move. `target` is `None` for homing seeks,
    /// whose endpoint the firmware decides.
    pub fn begin_move(&mut self, target: Option<u32>) {
        self.target_ticks = target;
        self.elapsed = Some(0);
        self.state = OpState::Busy;
    }

    /// A stop was commanded; drop the outstanding move.
    pub fn stop(&mut self) {
        self.target_ticks = None;
        self.elapsed = None;
        self.state = OpState::Idle;
    }

    pub fn advance_timer(&mut self) {
        if let Some(elapsed) = self.elapsed {
            self.elapsed = Some(elapsed.saturating_add(1));
        }
    }

    pub fn set_current_ticks(&mut self, ticks: u32) {
        self.current_ticks = ticks;
    }

    pub fn current_ticks(&self) -> u32 {
        self.current_ticks
    }

    pub fn target_ticks(&self) -> Option<u32> {
        self.target_ticks
    }

    pub fn elapsed(&self) -> Option<u32> {
        self.elapsed
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    /// Publish the position in degrees, only if it changed since the last
    /// published value.
    pub fn publish_position(&mut self, config: &DomeConfig, events: &mut Vec<DomeEvent>) {
        let degrees = ticks_to_azimuth(
            i64::from(self.current_ticks),
            config.home_azimuth_deg,
            config.ticks_per_turn,
        );
        if self.last_published_deg != Some(degrees) {
            self.last_published_deg = Some(degrees);
            events.push(DomeEvent::AzimuthPosition { degrees });
        }
    }

    /// Reconcile one raw status reading against the outstanding move.
    pub fn reconcile(
        &mut self,
        status: AzimuthStatus,
        config: &DomeConfig,
        events: &mut Vec<DomeEvent>,
    ) -> Arrival {
        match status {
            AzimuthStatus::Idle => {
                let settled = self
                    .elapsed
                    .is_some_and(|cycles| cycles > AZIMUTH_SETTLE_CYCLES);
                if !settled {
                    return Arrival::None;
                }
                if let Some(target) = self.target_ticks {
                    let miss = tick_distance(target, self.current_ticks, config.ticks_per_turn);
                    if miss > AZIMUTH_TOLERANCE_TICKS {
                        self.state = OpState::Alert;
                        self.elapsed = None;
                        self.target_ticks = None;
                        events.push(azimuth_event(OpState::Alert, "Could not position right"));
                        return Arrival::Missed;
                    }
                }
                if self.state != OpState::Ok {
                    self.state = OpState::Ok;
                    events.push(azimuth_event(OpState::Ok, "Dome is on target position"));
                }
                self.elapsed = None;
                self.target_ticks = None;
                Arrival::OnTarget
            }
            AzimuthStatus::MovingCw | AzimuthStatus::MovingCcw => {
                if self.elapsed.is_none() {
                    // nobody commanded this rotation
                    self.elapsed = Some(0);
                    self.target_ticks = None;
                    self.state = OpState::Alert;
                    events.push(azimuth_event(OpState::Alert, "Unexpected dome moving"));
                }
                Arrival::None
            }
            AzimuthStatus::Error => {
                if self.elapsed.is_some() || self.state != OpState::Alert {
                    self.state = OpState::Alert;
                    self.elapsed = None;
                    self.target_ticks = None;
                    events.push(azimuth_event(OpState::Alert, "Dome error"));
                }
                Arrival::None
            }
        }
    }
}

impl Default for AzimuthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DomeConfig {
        DomeConfig::default()
    }

    fn shutter_states(events: &[DomeEvent]) -> Vec<(OpState, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                DomeEvent::Shutter { state, message } => Some((*state, message.clone())),
                _ => None,
            })
            .collect()
    }

    mod shutter {
        use super::*;

        #[test]
        fn commanded_close_completes_with_ok() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Close);

            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Closing, &mut events);
            assert_eq!(tracker.state(), OpState::Busy);

            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Closed, &mut events);
            assert_eq!(tracker.state(), OpState::Ok);
            assert_eq!(tracker.elapsed(), None);
            assert_eq!(
                shutter_states(&events),
                vec![(OpState::Ok, "Shutter is closed".to_string())]
            );

            // stable state is not re-reported
            events.clear();
            tracker.reconcile(ShutterStatus::Closed, &mut events);
            assert!(events.is_empty());
        }

        #[test]
        fn unexpected_closed_flips_commanded_direction() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            // driver believes the shutter should be open, no timer running
            tracker.begin(ShutterCommand::Open);
            tracker.reconcile(ShutterStatus::Open, &mut events);
            assert_eq!(tracker.state(), OpState::Ok);
            events.clear();

            tracker.reconcile(ShutterStatus::Closed, &mut events);
            assert_eq!(tracker.state(), OpState::Idle);
            assert_eq!(tracker.commanded(), Some(ShutterCommand::Close));
            assert_eq!(
                shutter_states(&events),
                vec![(OpState::Idle, "Unexpected shutter closed".to_string())]
            );
        }

        #[test]
        fn stalled_open_alerts_after_four_cycles() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Open);

            for _ in 0..3 {
                tracker.advance_timer();
                tracker.reconcile(ShutterStatus::Closed, &mut events);
                assert_eq!(tracker.state(), OpState::Busy, "should still be waiting");
            }
            assert!(events.is_empty());

            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Closed, &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(
                shutter_states(&events),
                vec![(OpState::Alert, "Shutter still closed".to_string())]
            );

            // alert is edge-triggered, not repeated
            events.clear();
            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Closed, &mut events);
            assert!(events.is_empty());
        }

        #[test]
        fn stalled_close_alerts_after_four_cycles() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Close);

            for _ in 0..4 {
                tracker.advance_timer();
                tracker.reconcile(ShutterStatus::Open, &mut events);
            }
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(
                shutter_states(&events),
                vec![(OpState::Alert, "Shutter still open".to_string())]
            );
        }

        #[test]
        fn unexpected_opening_adopts_open_and_self_corrects() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();

            // first sighting: anomaly, intent flipped to open
            tracker.reconcile(ShutterStatus::Opening, &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.commanded(), Some(ShutterCommand::Open));

            // second sighting: our intent now, but no timer yet
            tracker.reconcile(ShutterStatus::Opening, &mut events);
            assert_eq!(tracker.elapsed(), Some(0));
            assert_eq!(tracker.state(), OpState::Alert);

            // third sighting: timer running, alert self-corrects to busy
            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Opening, &mut events);
            assert_eq!(tracker.state(), OpState::Busy);

            // and the open completes normally
            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Open, &mut events);
            assert_eq!(tracker.state(), OpState::Ok);
        }

        #[test]
        fn unexpected_closing_flips_to_close() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Open);
            tracker.advance_timer();

            tracker.reconcile(ShutterStatus::Closing, &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.commanded(), Some(ShutterCommand::Close));

            // next cycle the alert self-corrects to a tracked close
            tracker.advance_timer();
            tracker.reconcile(ShutterStatus::Closing, &mut events);
            assert_eq!(tracker.state(), OpState::Busy);
        }

        #[test]
        fn error_clears_commanded_intent_once() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Open);

            tracker.reconcile(ShutterStatus::Error, &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.commanded(), None);
            assert_eq!(shutter_states(&events).len(), 1);

            events.clear();
            tracker.reconcile(ShutterStatus::Error, &mut events);
            assert!(events.is_empty());
        }

        #[test]
        fn aborted_with_outstanding_move_alerts_and_clears() {
            let mut tracker = ShutterTracker::new();
            let mut events = Vec::new();
            tracker.begin(ShutterCommand::Open);
            tracker.advance_timer();

            tracker.reconcile(ShutterStatus::Aborted, &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.commanded(), None);
            assert_eq!(tracker.elapsed(), None);

            // a second aborted reading with no outstanding move is ignored
            events.clear();
            tracker.reconcile(ShutterStatus::Aborted, &mut events);
            assert!(events.is_empty());
        }
    }

    mod azimuth {
        use super::*;

        fn settle(tracker: &mut AzimuthTracker, cycles: u32) {
            for _ in 0..cycles {
                tracker.advance_timer();
            }
        }

        #[test]
        fn arrival_within_tolerance_confirms_ok() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(Some(102));
            tracker.set_current_ticks(100);

            settle(&mut tracker, 4);
            let arrival = tracker.reconcile(AzimuthStatus::Idle, &config(), &mut events);
            assert_eq!(arrival, Arrival::OnTarget);
            assert_eq!(tracker.state(), OpState::Ok);
            assert_eq!(tracker.target_ticks(), None);
            assert!(events
                .iter()
                .any(|e| matches!(e, DomeEvent::Azimuth { state: OpState::Ok, .. })));
        }

        #[test]
        fn arrival_outside_tolerance_alerts() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(Some(110));
            tracker.set_current_ticks(100);

            settle(&mut tracker, 4);
            let arrival = tracker.reconcile(AzimuthStatus::Idle, &config(), &mut events);
            assert_eq!(arrival, Arrival::Missed);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.target_ticks(), None);
            assert_eq!(tracker.elapsed(), None);
        }

        #[test]
        fn arrival_not_evaluated_before_settle_window() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(Some(110));
            tracker.set_current_ticks(100);

            settle(&mut tracker, 3);
            let arrival = tracker.reconcile(AzimuthStatus::Idle, &config(), &mut events);
            assert_eq!(arrival, Arrival::None);
            assert_eq!(tracker.state(), OpState::Busy);
            assert!(events.is_empty());
        }

        #[test]
        fn homing_seek_arrives_without_target() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(None);
            tracker.set_current_ticks(0);

            settle(&mut tracker, 4);
            let arrival = tracker.reconcile(AzimuthStatus::Idle, &config(), &mut events);
            assert_eq!(arrival, Arrival::OnTarget);
            assert_eq!(tracker.state(), OpState::Ok);
        }

        #[test]
        fn unexpected_motion_raises_alert_once() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();

            tracker.reconcile(AzimuthStatus::MovingCw, &config(), &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.elapsed(), Some(0));
            assert_eq!(events.len(), 1);

            events.clear();
            tracker.advance_timer();
            tracker.reconcile(AzimuthStatus::MovingCw, &config(), &mut events);
            assert!(events.is_empty());
        }

        #[test]
        fn commanded_motion_is_not_flagged() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(Some(50));

            tracker.advance_timer();
            tracker.reconcile(AzimuthStatus::MovingCcw, &config(), &mut events);
            assert_eq!(tracker.state(), OpState::Busy);
            assert!(events.is_empty());
        }

        #[test]
        fn drive_error_clears_move_and_alerts_once() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.begin_move(Some(50));

            tracker.reconcile(AzimuthStatus::Error, &config(), &mut events);
            assert_eq!(tracker.state(), OpState::Alert);
            assert_eq!(tracker.target_ticks(), None);
            assert_eq!(events.len(), 1);

            events.clear();
            tracker.reconcile(AzimuthStatus::Error, &config(), &mut events);
            assert!(events.is_empty());
        }

        #[test]
        fn position_published_only_on_change() {
            let mut tracker = AzimuthTracker::new();
            let mut events = Vec::new();
            tracker.set_current_ticks(90);

            tracker.publish_position(&config(), &mut events);
            assert_eq!(
                events,
                vec![DomeEvent::AzimuthPosition { degrees: 90.0 }]
            );

            events.clear();
            tracker.publish_position(&config(), &mut events);
            assert!(events.is_empty());

            tracker.set_current_ticks(91);
            tracker.publish_position(&config(), &mut events);
            assert_eq!(events.len(), 1);
        }
    }
}
