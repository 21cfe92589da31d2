use anyhow::anyhow;
use futures_signals::signal::Mutable;
use log::trace;

use crate::pickup_hal::{Action, PickupSensors, SubsumedBehavior, TagSighting};

/// Sensor readings shared between whoever drives the mock and the controller that
/// reads it.  Clones observe the same values.
#[derive(Debug, Clone)]
pub struct PickupHalMock {
    pub center_sonar: Mutable<Option<f64>>,
    pub tags: Mutable<Option<Vec<TagSighting>>>,
}

impl Default for PickupHalMock {
    fn default() -> Self {
        Self {
            center_sonar: Mutable::new(Some(3.0)),
            tags: Mutable::new(Some(Vec::new())),
        }
    }
}

impl PickupHalMock {
    pub fn set_center_sonar(&self, meters: f64) {
        self.center_sonar.set(Some(meters));
    }

    pub fn set_tags(&self, tags: Vec<TagSighting>) {
        self.tags.set(Some(tags));
    }

    /// Make the sensors report failures, as if the detector or sonar dropped out.
    pub fn disconnect(&self) {
        self.center_sonar.set(None);
        self.tags.set(None);
    }
}

impl PickupSensors for PickupHalMock {
    fn center_sonar_m(&self) -> anyhow::Result<f64> {
        let answer = self.center_sonar.get().ok_or_else(|| anyhow!("center sonar not connected"))?;
        trace!("center_sonar_m: {answer}");
        Ok(answer)
    }

    fn tags(&self) -> anyhow::Result<Vec<TagSighting>> {
        self.tags.get_cloned().ok_or_else(|| anyhow!("tag detector not connected"))
    }
}

/// Lower-priority behavior whose proposal can be swapped out at any time.
#[derive(Debug, Clone, Default)]
pub struct SubsumedBehaviorMock {
    pub proposal: Mutable<Action>,
}

impl SubsumedBehavior for SubsumedBehaviorMock {
    fn action(&self) -> Action {
        self.proposal.get()
    }
}
