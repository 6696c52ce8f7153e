pub mod doctor;
pub mod leg;
pub mod mission;
pub mod waypoints;

use serde::Deserialize;
use std::time::Duration;

pub use mission::{MissionController, MissionError};
pub use waypoints::{Waypoint, WaypointList};

use leg::LegTiming;

/// Static per-vehicle behavior after the last waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleRole {
    /// Hover at the last waypoint, waiting for a payload drop.
    #[default]
    Primary,
    /// Return to launch.
    Secondary,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionConfig {
    /// Run altitude above home. Default 10 m.
    pub altitude_m: Option<f32>,
    #[serde(default)]
    pub role: VehicleRole,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,

    pub mode_timeout_ms: Option<u64>,
    pub arm_timeout_ms: Option<u64>,
    pub spool_up_ms: Option<u64>,
    pub climb_settle_ms: Option<u64>,
    pub climb_timeout_ms: Option<u64>,
    pub arrival_radius_m: Option<f64>,
    pub resend_ms: Option<u64>,
    pub hold_ms: Option<u64>,
    pub poll_ms: Option<u64>,
}

impl MissionConfig {
    pub fn altitude(&self) -> f32 {
        self.altitude_m.unwrap_or(10.0)
    }

    pub fn mode_timeout(&self) -> Duration {
        Duration::from_millis(self.mode_timeout_ms.unwrap_or(5000))
    }

    pub fn arm_timeout(&self) -> Duration {
        Duration::from_millis(self.arm_timeout_ms.unwrap_or(10_000))
    }

    pub fn spool_up(&self) -> Duration {
        Duration::from_millis(self.spool_up_ms.unwrap_or(2000))
    }

    pub fn climb_settle(&self) -> Duration {
        Duration::from_millis(self.climb_settle_ms.unwrap_or(5000))
    }

    pub fn climb_timeout(&self) -> Duration {
        Duration::from_millis(self.climb_timeout_ms.unwrap_or(20_000))
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.unwrap_or(100))
    }

    pub fn leg_timing(&self) -> LegTiming {
        let d = LegTiming::default();
        LegTiming {
            arrival_radius_m: self.arrival_radius_m.unwrap_or(d.arrival_radius_m),
            resend: self.resend_ms.map(Duration::from_millis).unwrap_or(d.resend),
            hold: self.hold_ms.map(Duration::from_millis).unwrap_or(d.hold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg: MissionConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.altitude(), 10.0);
        assert_eq!(cfg.role, VehicleRole::Primary);
        assert_eq!(cfg.mode_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.leg_timing().resend, Duration::from_secs(2));
    }

    #[test]
    fn test_config_parse() {
        let cfg: MissionConfig = toml::from_str(
            r#"
            altitude_m = 25.0
            role = "secondary"
            resend_ms = 1500
            waypoints = [ { lat = 47.0, lon = 8.0 }, { lat = 47.001, lon = 8.0 } ]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.role, VehicleRole::Secondary);
        assert_eq!(cfg.waypoints.len(), 2);
        assert_eq!(cfg.leg_timing().resend, Duration::from_millis(1500));
    }
}
