//! Run the pickup behavior against a simulated cube:
//!
//! 1. Creep toward the cube while it is not held
//! 2. Drive the last inch once the tag is centered and close
//! 3. Grip, raise, and confirm with the center sonar
//! 4. Wander around holding it, rechecking periodically
//!
//! Useful for watching the state machine's timing without a robot (try `RUST_LOG=debug`).

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use clap::Parser;
use log::{info, warn};
use rand::Rng;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use rover_pickup::pickup_config::PickupConfig;
use rover_pickup::pickup_controller::{PickupController, PickupState};
use rover_pickup::pickup_hal::{Action, DriveCommand, GripperCommand, PickupSensors, SubsumedBehavior, TagSighting, TARGET_TAG_ID};
use rover_pickup::pickup_runner::PickupRunner;

#[derive(Parser, Debug)]
#[clap(name = "pickup_sim")]
struct Opts {
    /// JSON file with pickup thresholds and timings.
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(long)]
    recheck_interval: Option<f64>,

    /// Simulated seconds to run for.
    #[clap(short, long, default_value = "60")]
    duration: u64,

    #[clap(long, default_value = "100")]
    tick_ms: u64,

    /// Uniform noise, in meters, added to every distance reading.
    #[clap(long, default_value = "0.0")]
    noise: f64,

    /// Run on a paused clock, as fast as possible.
    #[clap(long)]
    fast: bool,

    /// Write the controller's final diagnostics here as JSON.
    #[clap(long)]
    state_out: Option<PathBuf>,
}

const START_DISTANCE_M: f64 = 0.6;
const CAMERA_HEIGHT_M: f64 = 0.2;
const GRIP_REACH_M: f64 = 0.1;
const HELD_SONAR_M: f64 = 0.06;
const EMPTY_SONAR_M: f64 = 3.0;
const METERS_PER_POWER_SEC: f64 = 0.004;
const SEARCH_POWER: i32 = 30;
const WANDER: DriveCommand = DriveCommand { left: 40, right: 20 };

#[derive(Debug)]
struct World {
    cube_distance: f64,
    held: bool,
    noise: f64,
}

impl World {
    fn apply(&mut self, action: &Action, dt: f64) {
        if self.held {
            return;
        }
        if action.grip == Some(GripperCommand::Closed) && self.cube_distance <= GRIP_REACH_M {
            info!("Cube is in the gripper");
            self.held = true;
            return;
        }
        let power = f64::from(action.drive.left + action.drive.right) / 2.0;
        self.cube_distance = (self.cube_distance - power * METERS_PER_POWER_SEC * dt).max(0.0);
    }

    fn jitter(&self) -> f64 {
        if self.noise > 0.0 {
            rand::thread_rng().gen_range(-self.noise..=self.noise)
        } else {
            0.0
        }
    }
}

#[derive(Clone)]
struct SimSensors(Arc<Mutex<World>>);

impl SimSensors {
    fn world(&self) -> anyhow::Result<std::sync::MutexGuard<'_, World>> {
        self.0.lock().map_err(|_| anyhow!("world lock poisoned"))
    }
}

impl PickupSensors for SimSensors {
    fn center_sonar_m(&self) -> anyhow::Result<f64> {
        let world = self.world()?;
        let range = if world.held { HELD_SONAR_M } else { world.cube_distance };
        Ok((range.min(EMPTY_SONAR_M) + world.jitter()).max(0.0))
    }

    fn tags(&self) -> anyhow::Result<Vec<TagSighting>> {
        let world = self.world()?;
        if world.held {
            return Ok(vec![]);
        }
        let horizontal = (world.cube_distance + world.jitter()).max(0.0);
        let slant = horizontal.hypot(CAMERA_HEIGHT_M);
        Ok(vec![TagSighting::new(TARGET_TAG_ID, world.jitter() / 10.0, horizontal, slant)])
    }
}

struct Wander;

impl SubsumedBehavior for Wander {
    fn action(&self) -> Action {
        Action::drive(WANDER)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let config = match &opts.config {
        Some(path) => PickupConfig::load(path)?,
        None => PickupConfig::default(),
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(opts.fast)
        .build()?;
    runtime.block_on(run(opts, config))
}

async fn run(opts: Opts, config: PickupConfig) -> anyhow::Result<()> {
    let world = Arc::new(Mutex::new(World {
        cube_distance: START_DISTANCE_M,
        held: false,
        noise: opts.noise,
    }));
    let sensors = SimSensors(world.clone());
    let (controller, timer_events) = PickupController::new(config, Box::new(sensors.clone()), Box::new(Wander))?;
    let tick = Duration::from_millis(opts.tick_ms.max(1));
    let runner = PickupRunner::start(controller, timer_events, tick);
    if let Some(secs) = opts.recheck_interval {
        runner.set_recheck_interval(secs).await?;
    }
    runner.set_lower_level_action(Action::drive(DriveCommand::straight(SEARCH_POWER))).await?;

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut last_state = runner.state.get();
    while started.elapsed() < Duration::from_secs(opts.duration) {
        interval.tick().await;
        let action = runner.action.get();
        sensors.world()?.apply(&action, tick.as_secs_f64());

        let state = runner.state.get();
        if state != last_state {
            println!("[{:>6.1}s] {:?} -> {:?}", started.elapsed().as_secs_f64(), last_state, state);
            last_state = state;
        }
    }

    let controller = runner.shutdown().await?;
    let diagnostics = controller.diagnostics();
    println!("Finished in {:?}: {:?}", diagnostics.state, sensors.world()?);
    if diagnostics.state != PickupState::Holding {
        warn!("Simulation ended without holding the cube");
    }

    if let Some(state_out) = opts.state_out {
        info!("Saving state to {:?}", state_out.display());
        let writer = BufWriter::new(File::create(state_out)?);
        serde_json::to_writer_pretty(writer, &diagnostics)?;
    }
    Ok(())
}
