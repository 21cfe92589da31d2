use derive_new::new;

/// Fiducial id printed on the pickup targets.
pub const TARGET_TAG_ID: i32 = 0;

pub trait PickupSensors {
    /// Short-range center sonar, in meters.  Larger is farther.
    fn center_sonar_m(&self) -> anyhow::Result<f64>;

    /// Tags detected by the downward camera this cycle, in no particular order.
    fn tags(&self) -> anyhow::Result<Vec<TagSighting>>;
}

/// The lower-priority behavior that drives the robot around while we hold the target.
pub trait SubsumedBehavior {
    fn action(&self) -> Action;
}

#[derive(new, Debug, PartialEq, Copy, Clone)]
pub struct TagSighting {
    pub id: i32,
    /// Signed offset from the camera center; near zero means centered.
    pub alignment: f64,
    pub horizontal_distance: f64,
    /// Slant distance from the camera to the tag.
    pub distance: f64,
}

impl TagSighting {
    pub fn is_target(&self) -> bool {
        self.id == TARGET_TAG_ID
    }
}

#[derive(new, Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct DriveCommand {
    pub left: i32,
    pub right: i32,
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand { left: 0, right: 0 };

    pub fn straight(power: i32) -> Self {
        Self { left: power, right: power }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum GripperCommand {
    Open,
    Closed,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum WristCommand {
    Up,
    Down,
    DownTwoThirds,
}

/// One cycle's worth of actuator requests.  `None` leaves the actuator where it is.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct Action {
    pub drive: DriveCommand,
    pub grip: Option<GripperCommand>,
    pub wrist: Option<WristCommand>,
}

impl Action {
    pub fn drive(drive: DriveCommand) -> Self {
        Self { drive, ..Default::default() }
    }
}
