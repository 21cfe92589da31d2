use log::{debug, info, trace};
use serde::Serialize;

use crate::pickup_config::{self, ConfigError, PickupConfig};
use crate::pickup_hal::{Action, DriveCommand, GripperCommand, PickupSensors, SubsumedBehavior, WristCommand};
use crate::pickup_timers::{OneShotTimer, PeriodicTimer, TimerEvent, TimerEvents, TimerKind};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize)]
pub enum PickupState {
    NotHolding,
    LastInch,
    Grip,
    Raise,
    Checking,
    Rechecking,
    Holding,
}

impl PickupState {
    /// States in which the recheck timer is allowed to run.
    pub fn is_holding_region(&self) -> bool {
        matches!(self, PickupState::Holding | PickupState::Rechecking)
    }
}

/// Point-in-time view of the controller, for logging and state dumps.
#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct PickupDiagnostics {
    pub state: PickupState,
    pub distance_to_target: Option<f64>,
    pub center_range: Option<f64>,
    pub allow_reset: bool,
    pub recheck_interval_secs: f64,
    pub recheck_running: bool,
}

/// Drives the last inch onto a target tag, grips and raises it, then keeps
/// re-verifying the grip while a lower-priority behavior drives us around.
///
/// Progression between states is paced by three timers whose firings arrive through
/// the [TimerEvents] returned by [PickupController::new] and must be fed back in via
/// [PickupController::handle_timer] by whoever owns the controller.
pub struct PickupController {
    config: PickupConfig,
    sensors: Box<dyn PickupSensors + Send>,
    subsumed: Box<dyn SubsumedBehavior + Send>,
    lower_level_action: Action,
    state: PickupState,
    distance_to_target: Option<f64>,
    center_range: Option<f64>,
    allow_reset: bool,
    step_timer: OneShotTimer,
    check_timer: OneShotTimer,
    recheck_timer: PeriodicTimer,
}

impl PickupController {
    pub fn new(
        config: PickupConfig,
        sensors: Box<dyn PickupSensors + Send>,
        subsumed: Box<dyn SubsumedBehavior + Send>,
    ) -> Result<(Self, TimerEvents), ConfigError> {
        config.validate()?;
        let (tx, timer_events) = TimerEvents::channel();
        let recheck_interval = config.recheck_interval();
        let controller = Self {
            config,
            sensors,
            subsumed,
            lower_level_action: Action::default(),
            state: PickupState::NotHolding,
            distance_to_target: None,
            center_range: None,
            allow_reset: true,
            step_timer: OneShotTimer::new(TimerKind::Step, tx.clone()),
            check_timer: OneShotTimer::new(TimerKind::Check, tx.clone()),
            recheck_timer: PeriodicTimer::new(TimerKind::Recheck, tx, recheck_interval),
        };
        Ok((controller, timer_events))
    }

    pub fn state(&self) -> PickupState {
        self.state
    }

    /// Slant distance to a centered target tag, only known right after an
    /// [update](Self::update) while checking.
    pub fn distance_to_target(&self) -> Option<f64> {
        self.distance_to_target
    }

    pub fn center_range(&self) -> Option<f64> {
        self.center_range
    }

    pub fn recheck_interval(&self) -> std::time::Duration {
        self.recheck_timer.period()
    }

    pub fn diagnostics(&self) -> PickupDiagnostics {
        PickupDiagnostics {
            state: self.state,
            distance_to_target: self.distance_to_target,
            center_range: self.center_range,
            allow_reset: self.allow_reset,
            recheck_interval_secs: self.recheck_timer.period().as_secs_f64(),
            recheck_running: self.recheck_timer.is_running(),
        }
    }

    /// The action handed down by the arbiter, passed through whenever we have no
    /// opinion of our own.
    pub fn set_lower_level_action(&mut self, action: Action) {
        self.lower_level_action = action;
    }

    pub fn set_recheck_interval(&mut self, secs: f64) -> Result<(), ConfigError> {
        let period = pickup_config::recheck_interval(secs)?;
        self.recheck_timer.stop();
        self.recheck_timer.set_period(period);
        if self.state.is_holding_region() {
            self.recheck_timer.start();
        }
        Ok(())
    }

    /// One control cycle: look at the tags, maybe transition, and say what we want done.
    pub fn update(&mut self) -> Action {
        self.process_tags();
        self.center_range = self.read_center_sonar();

        let mut action = self.lower_level_action;
        match self.state {
            PickupState::NotHolding => {}
            PickupState::LastInch => {
                action.drive = DriveCommand::straight(self.config.last_inch_power);
                self.reset_step_timer(self.config.last_inch_duration());
            }
            PickupState::Grip => {
                action.drive = DriveCommand::STOP;
                action.grip = Some(GripperCommand::Closed);
                action.wrist = Some(WristCommand::Down);
                self.reset_step_timer(self.config.grip_duration());
            }
            PickupState::Raise => {
                action.drive = DriveCommand::STOP;
                action.grip = Some(GripperCommand::Closed);
                action.wrist = Some(WristCommand::Up);
                self.reset_step_timer(self.config.raise_duration());
            }
            PickupState::Checking => {
                action.drive = DriveCommand::STOP;
                apply_grip_hold_pose(&mut action);
            }
            PickupState::Rechecking => {
                apply_grip_hold_pose(&mut action);
            }
            PickupState::Holding => {
                action = self.subsumed.action();
                action.grip = Some(GripperCommand::Closed);
                action.wrist = Some(WristCommand::DownTwoThirds);
            }
        }
        action
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        let current = match event.kind {
            TimerKind::Step => self.step_timer.is_current(&event),
            TimerKind::Check => self.check_timer.is_current(&event),
            TimerKind::Recheck => self.recheck_timer.is_current(&event),
        };
        if !current {
            trace!("Dropping superseded {:?} timer event", event.kind);
            return;
        }
        match event.kind {
            TimerKind::Step => self.on_step_timeout(),
            TimerKind::Check => self.on_check_timeout(),
            TimerKind::Recheck => self.on_recheck_fire(),
        }
    }

    /// Always re-opens the step timer guard, whatever state we are in, then advances
    /// the pickup sequence.
    pub fn on_step_timeout(&mut self) {
        self.allow_reset = true;
        match self.state {
            PickupState::LastInch => self.transition_to(PickupState::Grip),
            PickupState::Grip => self.transition_to(PickupState::Raise),
            PickupState::Raise => {
                self.check_timer.start(self.config.check_duration());
                self.transition_to(PickupState::Checking);
            }
            state => trace!("Step timeout ignored in {state:?}"),
        }
    }

    pub fn on_check_timeout(&mut self) {
        if !matches!(self.state, PickupState::Checking | PickupState::Rechecking) {
            trace!("Check timeout ignored in {:?}", self.state);
            return;
        }

        self.center_range = self.read_center_sonar();
        let sonar_contact = self.center_range.map_or(false, |range| range < self.config.contact_range);
        let tag_contact = self.distance_to_target
            .map_or(false, |distance| distance < self.config.target_distance_threshold);
        if sonar_contact || tag_contact {
            self.transition_to(PickupState::Holding);
            self.recheck_timer.start();
        } else {
            info!(
                "Grip check failed (center range {:?}, tag distance {:?})",
                self.center_range, self.distance_to_target);
            self.transition_to(PickupState::NotHolding);
        }
    }

    pub fn on_recheck_fire(&mut self) {
        if self.state != PickupState::Holding {
            trace!("Recheck ignored in {:?}", self.state);
            return;
        }
        self.check_timer.start(self.config.recheck_check_duration());
        self.transition_to(PickupState::Rechecking);
    }

    fn process_tags(&mut self) {
        self.distance_to_target = None;

        let tags = match self.sensors.tags() {
            Ok(tags) => tags,
            Err(e) => {
                debug!("No tag data this cycle: {e:#}");
                return;
            }
        };

        for tag in tags.iter().filter(|tag| tag.is_target()) {
            match self.state {
                PickupState::NotHolding => {
                    if tag.alignment.abs() < self.config.alignment_threshold
                        && tag.horizontal_distance < self.config.pickup_distance {
                        self.transition_to(PickupState::LastInch);
                    }
                }
                PickupState::Checking => {
                    if tag.alignment.abs() < self.config.center_alignment_threshold {
                        // Closest centered tag wins when the detector reports several.
                        self.distance_to_target = Some(match self.distance_to_target {
                            Some(closest) => closest.min(tag.distance),
                            None => tag.distance,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn read_center_sonar(&self) -> Option<f64> {
        match self.sensors.center_sonar_m() {
            Ok(range) => Some(range),
            Err(e) => {
                debug!("No center sonar reading: {e:#}");
                None
            }
        }
    }

    fn reset_step_timer(&mut self, duration: std::time::Duration) {
        if !self.allow_reset {
            return;
        }
        self.allow_reset = false;
        self.step_timer.start(duration);
    }

    fn transition_to(&mut self, next: PickupState) {
        info!("{:?} -> {:?}", self.state, next);
        if self.state.is_holding_region() && !next.is_holding_region() {
            self.recheck_timer.stop();
        }
        self.distance_to_target = None;
        self.state = next;
    }
}

fn apply_grip_hold_pose(action: &mut Action) {
    action.grip = Some(GripperCommand::Closed);
    action.wrist = Some(WristCommand::Up);
}
