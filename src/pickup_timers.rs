use log::debug;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
pub enum TimerKind {
  Step,
  Check,
  Recheck,
}

/// A single firing of one of the controller's timers.  The generation identifies which
/// arming produced it, so firings from a superseded or stopped arming can be told apart.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct TimerEvent {
  pub kind: TimerKind,
  generation: u64,
}

/// Receiving end for every timer created from the same channel.
pub struct TimerEvents {
  rx: UnboundedReceiver<TimerEvent>,
}

impl TimerEvents {
  pub fn channel() -> (UnboundedSender<TimerEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  pub async fn recv(&mut self) -> Option<TimerEvent> {
    self.rx.recv().await
  }

  pub fn try_recv(&mut self) -> Option<TimerEvent> {
    self.rx.try_recv().ok()
  }
}

pub struct OneShotTimer {
  kind: TimerKind,
  tx: UnboundedSender<TimerEvent>,
  generation: u64,
  handle: Option<JoinHandle<()>>,
}

impl OneShotTimer {
  pub fn new(kind: TimerKind, tx: UnboundedSender<TimerEvent>) -> Self {
    Self { kind, tx, generation: 0, handle: None }
  }

  /// Fires once, `period` from now.  Any pending firing is cancelled first.
  pub fn start(&mut self, period: Duration) {
    self.stop();
    debug!("{:?} timer armed for {:?}", self.kind, period);
    let deadline = Instant::now() + period;
    let event = TimerEvent { kind: self.kind, generation: self.generation };
    let tx = self.tx.clone();
    self.handle = Some(tokio::spawn(async move {
      tokio::time::sleep_until(deadline).await;
      let _ = tx.send(event);
    }));
  }

  pub fn stop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
    self.generation += 1;
  }

  pub fn is_current(&self, event: &TimerEvent) -> bool {
    event.kind == self.kind && event.generation == self.generation
  }
}

impl Drop for OneShotTimer {
  fn drop(&mut self) {
    self.stop();
  }
}

pub struct PeriodicTimer {
  kind: TimerKind,
  tx: UnboundedSender<TimerEvent>,
  period: Duration,
  generation: u64,
  handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
  pub fn new(kind: TimerKind, tx: UnboundedSender<TimerEvent>, period: Duration) -> Self {
    Self { kind, tx, period, generation: 0, handle: None }
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  /// Takes effect on the next `start`.
  pub fn set_period(&mut self, period: Duration) {
    self.period = period;
  }

  /// (Re)starts the timer; the first firing is one full period from now.
  pub fn start(&mut self) {
    self.stop();
    debug!("{:?} timer running every {:?}", self.kind, self.period);
    let period = self.period;
    let event = TimerEvent { kind: self.kind, generation: self.generation };
    let tx = self.tx.clone();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    self.handle = Some(tokio::spawn(async move {
      loop {
        interval.tick().await;
        if tx.send(event).is_err() {
          return;
        }
      }
    }));
  }

  pub fn stop(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
    self.generation += 1;
  }

  pub fn is_running(&self) -> bool {
    self.handle.is_some()
  }

  pub fn is_current(&self, event: &TimerEvent) -> bool {
    event.kind == self.kind && event.generation == self.generation
  }
}

impl Drop for PeriodicTimer {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
      elapsed >= expected && elapsed < expected + Duration::from_millis(10),
      "expected {expected:?}, got {elapsed:?}");
  }

  #[tokio::test(start_paused = true)]
  async fn test_one_shot_fires_once_after_period() {
    let (tx, mut events) = TimerEvents::channel();
    let mut timer = OneShotTimer::new(TimerKind::Step, tx);
    let start = Instant::now();
    timer.start(Duration::from_millis(700));

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, TimerKind::Step);
    assert!(timer.is_current(&event));
    assert_elapsed(start, Duration::from_millis(700));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(events.try_recv(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_restart_supersedes_pending_firing() {
    let (tx, mut events) = TimerEvents::channel();
    let mut timer = OneShotTimer::new(TimerKind::Check, tx);
    let start = Instant::now();
    timer.start(Duration::from_secs(2));
    tokio::time::advance(Duration::from_secs(1)).await;
    timer.start(Duration::from_secs(3));

    let event = events.recv().await.unwrap();
    assert!(timer.is_current(&event));
    assert_elapsed(start, Duration::from_secs(4));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(events.try_recv(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stop_makes_delivered_event_stale() {
    let (tx, mut events) = TimerEvents::channel();
    let mut timer = OneShotTimer::new(TimerKind::Check, tx);
    timer.start(Duration::from_secs(1));
    let event = events.recv().await.unwrap();
    timer.stop();
    assert!(!timer.is_current(&event));
  }

  #[tokio::test(start_paused = true)]
  async fn test_periodic_fires_every_period_until_stopped() {
    let (tx, mut events) = TimerEvents::channel();
    let mut timer = PeriodicTimer::new(TimerKind::Recheck, tx, Duration::from_secs(5));
    let start = Instant::now();
    timer.start();
    assert!(timer.is_running());

    for i in 1..=3 {
      let event = events.recv().await.unwrap();
      assert!(timer.is_current(&event));
      assert_elapsed(start, Duration::from_secs(5 * i));
    }

    timer.stop();
    assert!(!timer.is_running());
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(events.try_recv(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_periodic_set_period_applies_on_restart() {
    let (tx, mut events) = TimerEvents::channel();
    let mut timer = PeriodicTimer::new(TimerKind::Recheck, tx, Duration::from_secs(30));
    timer.set_period(Duration::from_secs(2));
    let start = Instant::now();
    timer.start();
    events.recv().await.unwrap();
    assert_elapsed(start, Duration::from_secs(2));
    assert_eq!(timer.period(), Duration::from_secs(2));
  }
}
