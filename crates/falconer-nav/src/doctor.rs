use anyhow::Result;
use falconer_fc::FcConfig;

use crate::MissionConfig;

pub const MAX_ALTITUDE_M: f32 = 120.0;

pub fn check_fc(fc: &FcConfig) -> Result<()> {
    if fc.autodetect {
        anyhow::ensure!(
            fc.candidate_devs.as_ref().map_or(true, |d| !d.is_empty()),
            "fc.candidate_devs is empty"
        );
        anyhow::ensure!(
            fc.candidate_bauds.as_ref().map_or(true, |b| !b.is_empty()),
            "fc.candidate_bauds is empty"
        );
    } else {
        anyhow::ensure!(
            fc.endpoint.as_ref().map_or(false, |s| !s.trim().is_empty()),
            "fc.endpoint missing (autodetect=false)"
        );
        anyhow::ensure!(fc.baud.map_or(true, |b| b > 0), "fc.baud invalid");
    }
    anyhow::ensure!(fc.vehicle_id >= 1, "fc.vehicle_id is 1-based");
    Ok(())
}

pub fn check_mission(mission: &MissionConfig) -> Result<()> {
    let alt = mission.altitude();
    anyhow::ensure!(
        (1.0..=MAX_ALTITUDE_M).contains(&alt),
        "mission.altitude_m should be 1..{}",
        MAX_ALTITUDE_M
    );
    for (i, wp) in mission.waypoints.iter().enumerate() {
        anyhow::ensure!(
            wp.lat.is_finite() && wp.lon.is_finite() && wp.lat.abs() <= 90.0 && wp.lon.abs() <= 180.0,
            "mission.waypoints[{}] coordinates invalid",
            i
        );
    }
    anyhow::ensure!(mission.leg_timing().arrival_radius_m > 0.0, "mission.arrival_radius_m must be positive");
    Ok(())
}

/// Deadzone must leave room to steer on both axes.
pub fn check_intercept(deadzone_px: f32, frame: (u32, u32), dwell_ms: u64) -> Result<()> {
    let half = frame.0.min(frame.1) as f32 / 2.0;
    anyhow::ensure!(frame.0 > 0 && frame.1 > 0, "intercept frame size invalid");
    anyhow::ensure!(deadzone_px > 0.0 && deadzone_px < half, "intercept.deadzone_px should be 0..{}", half);
    anyhow::ensure!(dwell_ms > 0, "intercept.dwell_ms must be positive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Waypoint;

    #[test]
    fn test_fc_endpoint_required_without_autodetect() {
        assert!(check_fc(&FcConfig::default()).is_err());
        let fc = FcConfig { endpoint: Some("udpin:0.0.0.0:14550".into()), ..Default::default() };
        assert!(check_fc(&fc).is_ok());
        let fc = FcConfig { autodetect: true, ..Default::default() };
        assert!(check_fc(&fc).is_ok());
        let fc = FcConfig { autodetect: true, candidate_bauds: Some(vec![]), ..Default::default() };
        assert!(check_fc(&fc).is_err());
    }

    #[test]
    fn test_mission_altitude_range() {
        assert!(check_mission(&MissionConfig::default()).is_ok());
        for alt in [0.5, 121.0] {
            let m = MissionConfig { altitude_m: Some(alt), ..Default::default() };
            assert!(check_mission(&m).is_err(), "alt {}", alt);
        }
        let m = MissionConfig { altitude_m: Some(120.0), ..Default::default() };
        assert!(check_mission(&m).is_ok());
    }

    #[test]
    fn test_mission_rejects_bad_waypoint() {
        let m = MissionConfig {
            waypoints: vec![Waypoint::new(47.0, 8.0), Waypoint::new(95.0, 8.0)],
            ..Default::default()
        };
        let err = check_mission(&m).unwrap_err();
        assert!(err.to_string().contains("waypoints[1]"));
    }

    #[test]
    fn test_intercept_geometry() {
        assert!(check_intercept(30.0, (320, 240), 1000).is_ok());
        assert!(check_intercept(120.0, (320, 240), 1000).is_err());
        assert!(check_intercept(30.0, (320, 240), 0).is_err());
        assert!(check_intercept(30.0, (0, 240), 1000).is_err());
    }
}
