use anyhow::anyhow;
use futures_signals::signal::Mutable;
use log::{info, trace};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::pickup_config::ConfigError;
use crate::pickup_controller::{PickupController, PickupState};
use crate::pickup_hal::Action;
use crate::pickup_timers::TimerEvents;

/// Owns a [PickupController] on its own task, so control cycles, timer callbacks and
/// reconfiguration are only ever applied one at a time.
pub struct PickupRunner {
  controller: PickupController,
  timer_events: TimerEvents,
  action: Mutable<Action>,
  state: Mutable<PickupState>,
}

impl PickupRunner {
  pub fn start(controller: PickupController, timer_events: TimerEvents, tick_interval: Duration) -> PickupRunnerHandle {
    let (tx, rx) = mpsc::channel::<InternalEvent>(32);
    let action = Mutable::new(Action::default());
    let state = Mutable::new(controller.state());
    let me = Self {
      controller,
      timer_events,
      action: action.clone(),
      state: state.clone(),
    };
    let join_handle = tokio::spawn(me.run(rx, tick_interval));
    PickupRunnerHandle { tx, join_handle, action, state }
  }

  async fn run(mut self, mut rx: Receiver<InternalEvent>, tick_interval: Duration) -> PickupController {
    info!("Pickup runner started, ticking every {tick_interval:?}");
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        _ = interval.tick() => {
          trace!("<tick!>");
          let action = self.controller.update();
          self.action.set_neq(action);
          self.publish_state();
        },
        Some(event) = self.timer_events.recv() => {
          self.controller.handle_timer(event);
          self.publish_state();
        },
        command = rx.recv() => {
          match command {
            Some(InternalEvent::SetRecheckInterval(secs, reply)) => {
              let _ = reply.send(self.controller.set_recheck_interval(secs));
              self.publish_state();
            },
            Some(InternalEvent::SetLowerLevelAction(action)) => {
              self.controller.set_lower_level_action(action);
            },
            Some(InternalEvent::Shutdown) | None => {
              info!("Pickup runner shutting down in {:?}", self.controller.state());
              break;
            },
          }
        },
      }
    }
    self.controller
  }

  fn publish_state(&self) {
    self.state.set_neq(self.controller.state());
  }
}

pub struct PickupRunnerHandle {
  tx: Sender<InternalEvent>,
  join_handle: JoinHandle<PickupController>,
  /// Latest action requested by the controller, updated once per control cycle.
  pub action: Mutable<Action>,
  pub state: Mutable<PickupState>,
}

impl PickupRunnerHandle {
  pub async fn set_recheck_interval(&self, secs: f64) -> anyhow::Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel::<Result<(), ConfigError>>();
    self.send(InternalEvent::SetRecheckInterval(secs, reply_tx)).await?;
    reply_rx.await??;
    Ok(())
  }

  pub async fn set_lower_level_action(&self, action: Action) -> anyhow::Result<()> {
    self.send(InternalEvent::SetLowerLevelAction(action)).await
  }

  /// Stops the control loop and hands the controller back, e.g. to dump its state.
  pub async fn shutdown(self) -> anyhow::Result<PickupController> {
    self.send(InternalEvent::Shutdown).await?;
    Ok(self.join_handle.await?)
  }

  async fn send(&self, event: InternalEvent) -> anyhow::Result<()> {
    self.tx.send(event).await.map_err(|_| anyhow!("pickup runner is not running"))
  }
}

enum InternalEvent {
  SetRecheckInterval(f64, oneshot::Sender<Result<(), ConfigError>>),
  SetLowerLevelAction(Action),
  Shutdown,
}

#[cfg(test)]
mod tests {
  use futures::StreamExt;
  use futures_signals::signal::SignalExt;

  use crate::pickup_config::PickupConfig;
  use crate::pickup_hal::{DriveCommand, GripperCommand, TagSighting, WristCommand};
  use crate::pickup_hal_mock::{PickupHalMock, SubsumedBehaviorMock};

  use super::*;

  const TEST_TICK_INTERVAL: Duration = Duration::from_millis(100);

  fn start_runner() -> (PickupRunnerHandle, PickupHalMock, SubsumedBehaviorMock) {
    let hal = PickupHalMock::default();
    let subsumed = SubsumedBehaviorMock::default();
    let (controller, timer_events) = PickupController::new(
      PickupConfig::default(),
      Box::new(hal.clone()),
      Box::new(subsumed.clone())).unwrap();
    let runner = PickupRunner::start(controller, timer_events, TEST_TICK_INTERVAL);
    (runner, hal, subsumed)
  }

  #[tokio::test(start_paused = true)]
  async fn test_shutdown_returns_controller() {
    let (runner, _hal, _subsumed) = start_runner();
    let controller = runner.shutdown().await.unwrap();
    assert_eq!(controller.state(), PickupState::NotHolding);
  }

  #[tokio::test(start_paused = true)]
  async fn test_picks_up_and_holds() {
    let (runner, hal, subsumed) = start_runner();
    subsumed.proposal.set(Action::drive(DriveCommand::new(40, 35)));
    let mut states = runner.state.signal().to_stream();
    assert_eq!(states.next().await, Some(PickupState::NotHolding));

    hal.set_center_sonar(0.08);
    hal.set_tags(vec![TagSighting::new(0, 0.02, 0.1, 0.2)]);
    assert_eq!(states.next().await, Some(PickupState::LastInch));
    hal.set_tags(vec![]);

    for expected in [PickupState::Grip, PickupState::Raise, PickupState::Checking, PickupState::Holding] {
      assert_eq!(states.next().await, Some(expected));
    }

    tokio::time::sleep(TEST_TICK_INTERVAL * 2).await;
    assert_eq!(runner.action.get(), Action {
      drive: DriveCommand::new(40, 35),
      grip: Some(GripperCommand::Closed),
      wrist: Some(WristCommand::DownTwoThirds),
    });

    let controller = runner.shutdown().await.unwrap();
    assert!(controller.diagnostics().recheck_running);
  }

  #[tokio::test(start_paused = true)]
  async fn test_recheck_interval_is_applied_in_loop() {
    let (runner, hal, _subsumed) = start_runner();
    runner.set_recheck_interval(5.0).await.unwrap();
    assert!(runner.set_recheck_interval(-2.0).await.is_err());

    hal.set_center_sonar(0.08);
    hal.set_tags(vec![TagSighting::new(0, 0.0, 0.1, 0.2)]);
    let mut states = runner.state.signal().to_stream();
    while states.next().await != Some(PickupState::Holding) {}
    hal.set_tags(vec![]);

    let held_at = tokio::time::Instant::now();
    assert_eq!(states.next().await, Some(PickupState::Rechecking));
    assert!(held_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(states.next().await, Some(PickupState::Holding));

    hal.set_center_sonar(0.5);
    assert_eq!(states.next().await, Some(PickupState::Rechecking));
    assert_eq!(states.next().await, Some(PickupState::NotHolding));

    let controller = runner.shutdown().await.unwrap();
    assert_eq!(controller.recheck_interval(), Duration::from_secs(5));
    assert!(!controller.diagnostics().recheck_running);
  }

  #[tokio::test(start_paused = true)]
  async fn test_lower_level_action_passes_through() {
    let (runner, _hal, _subsumed) = start_runner();
    let wander = Action::drive(DriveCommand::new(25, 30));
    runner.set_lower_level_action(wander).await.unwrap();
    tokio::time::sleep(TEST_TICK_INTERVAL * 2).await;
    assert_eq!(runner.action.get(), wander);
    runner.shutdown().await.unwrap();
  }
}
