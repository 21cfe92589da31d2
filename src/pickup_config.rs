use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, PartialEq, Clone, Debug)]
pub enum ConfigError {
    #[error("recheck interval must be a positive number of seconds, got {0}")]
    InvalidRecheckInterval(f64),
    #[error("{name} must be a positive number of seconds, got {value}")]
    InvalidDuration { name: &'static str, value: f64 },
    #[error("{name} must be a non-negative number, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
}

/// Thresholds and timings for the pickup behavior.  Distances are meters, durations
/// are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupConfig {
    /// Max |alignment| of the target tag to start the final approach.
    pub alignment_threshold: f64,
    /// Max horizontal distance of the target tag to start the final approach.
    pub pickup_distance: f64,
    /// Max |alignment| for a tag to count towards the distance estimate while checking.
    pub center_alignment_threshold: f64,
    /// Center sonar readings below this mean the target is in the gripper.
    pub contact_range: f64,
    /// Tag distances below this mean the target is in the gripper.
    pub target_distance_threshold: f64,
    pub last_inch_power: i32,
    pub last_inch_secs: f64,
    pub grip_secs: f64,
    pub raise_secs: f64,
    pub check_secs: f64,
    pub recheck_check_secs: f64,
    pub recheck_interval_secs: f64,
}

impl Default for PickupConfig {
    fn default() -> Self {
        Self {
            alignment_threshold: 0.1,
            pickup_distance: 0.25,
            center_alignment_threshold: 0.01,
            contact_range: 0.12,
            target_distance_threshold: 0.14,
            last_inch_power: 60,
            last_inch_secs: 0.7,
            grip_secs: 1.5,
            raise_secs: 2.0,
            check_secs: 3.0,
            recheck_check_secs: 3.0,
            recheck_interval_secs: 30.0,
        }
    }
}

impl PickupConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: PickupConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("alignment_threshold", self.alignment_threshold),
            ("pickup_distance", self.pickup_distance),
            ("center_alignment_threshold", self.center_alignment_threshold),
            ("contact_range", self.contact_range),
            ("target_distance_threshold", self.target_distance_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        for (name, value) in [
            ("last_inch_secs", self.last_inch_secs),
            ("grip_secs", self.grip_secs),
            ("raise_secs", self.raise_secs),
            ("check_secs", self.check_secs),
            ("recheck_check_secs", self.recheck_check_secs),
        ] {
            seconds(name, value)?;
        }
        recheck_interval(self.recheck_interval_secs)?;
        Ok(())
    }

    pub fn last_inch_duration(&self) -> Duration {
        Duration::from_secs_f64(self.last_inch_secs)
    }

    pub fn grip_duration(&self) -> Duration {
        Duration::from_secs_f64(self.grip_secs)
    }

    pub fn raise_duration(&self) -> Duration {
        Duration::from_secs_f64(self.raise_secs)
    }

    pub fn check_duration(&self) -> Duration {
        Duration::from_secs_f64(self.check_secs)
    }

    pub fn recheck_check_duration(&self) -> Duration {
        Duration::from_secs_f64(self.recheck_check_secs)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs_f64(self.recheck_interval_secs)
    }
}

/// Checks a recheck period, as handed to `PickupController::set_recheck_interval`.
pub fn recheck_interval(secs: f64) -> Result<Duration, ConfigError> {
    seconds("recheck_interval_secs", secs)
        .map_err(|_| ConfigError::InvalidRecheckInterval(secs))
}

/// Longest timer period accepted (one day); timer deadlines must stay addable to `Instant::now()`.
pub const MAX_PERIOD_SECS: f64 = 86_400.0;

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() && value <= MAX_PERIOD_SECS => Ok(duration),
        _ => Err(ConfigError::InvalidDuration { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(PickupConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: PickupConfig =
            serde_json::from_str(r#"{ "contact_range": 0.2, "recheck_interval_secs": 5.0 }"#).unwrap();
        assert_eq!(config.contact_range, 0.2);
        assert_eq!(config.recheck_interval(), Duration::from_secs(5));
        assert_eq!(config.grip_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_bad_durations() {
        let config = PickupConfig { grip_secs: 0.0, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDuration { name: "grip_secs", value: 0.0 }));

        let config = PickupConfig { recheck_interval_secs: -1.0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidRecheckInterval(-1.0)));
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let config = PickupConfig { contact_range: -0.5, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { name: "contact_range", value: -0.5 }));
    }

    #[test]
    fn test_rejects_unschedulable_periods() {
        let config = PickupConfig { check_secs: 1e19, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDuration { name: "check_secs", value: 1e19 }));

        assert_eq!(recheck_interval(1e19), Err(ConfigError::InvalidRecheckInterval(1e19)));
        assert_eq!(recheck_interval(MAX_PERIOD_SECS + 1.0), Err(ConfigError::InvalidRecheckInterval(MAX_PERIOD_SECS + 1.0)));
        assert_eq!(recheck_interval(MAX_PERIOD_SECS), Ok(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_recheck_interval_rejects_nan() {
        assert!(matches!(recheck_interval(f64::NAN), Err(ConfigError::InvalidRecheckInterval(v)) if v.is_nan()));
        assert_eq!(recheck_interval(5.0), Ok(Duration::from_secs(5)));
    }
}
