use falconer_proto::geo::haversine_m;
use falconer_proto::telemetry::{HomePosition, VehicleState};
use mavlink::ardupilotmega::{MavMessage, MavModeFlag, MavType};
use tracing::{info, warn};

use crate::modes;

/// Human-readable GPS fix label.
pub fn gps_fix_string(fix: u8) -> String {
    match fix {
        0 | 1 => "No Fix".into(),
        2 => "2D Fix".into(),
        3 => "3D Fix".into(),
        4 => "DGPS".into(),
        5 => "RTK".into(),
        n => format!("Type {}", n),
    }
}

/// NUL-padded STATUSTEXT payload to a trimmed string.
pub fn status_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// Fold one inbound message into `state`. Unknown message kinds are ignored.
pub fn apply(state: &mut VehicleState, msg: &MavMessage, label: &str) {
    match msg {
        MavMessage::HEARTBEAT(hb) => {
            if hb.mavtype == MavType::MAV_TYPE_GCS {
                return;
            }
            let mode = modes::mode_name(hb.custom_mode);
            let armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            if mode != state.mode {
                info!("{}: mode {} -> {}", label, state.mode, mode);
                state.mode = mode;
            }
            if armed != state.armed {
                info!("{}: {}", label, if armed { "ARMED" } else { "DISARMED" });
                state.armed = armed;
            }
            state.system_status = hb.system_status as u8;
        }
        MavMessage::GPS_RAW_INT(gps) => {
            let fix = gps.fix_type as u8;
            if fix != state.gps_fix {
                info!("{}: GPS {} -> {}", label, state.gps_string, gps_fix_string(fix));
            }
            state.gps_fix = fix;
            state.gps_sats = gps.satellites_visible;
            state.gps_hdop = gps.eph as f32 / 100.0;
            state.gps_string = gps_fix_string(fix);
        }
        MavMessage::GLOBAL_POSITION_INT(pos) => {
            state.lat = pos.lat as f64 / 1e7;
            state.lon = pos.lon as f64 / 1e7;
            state.alt_rel = pos.relative_alt as f32 / 1000.0;
            if pos.hdg != u16::MAX {
                state.heading = pos.hdg as f32 / 100.0;
            }
            let (vx, vy) = (pos.vx as f32 / 100.0, pos.vy as f32 / 100.0);
            state.ground_speed = vx.hypot(vy);
            state.climb = -(pos.vz as f32) / 100.0;

            if state.home.is_none() && state.has_3d_fix() {
                state.home = Some(HomePosition { lat: state.lat, lon: state.lon });
                info!("{}: home set {:.7}, {:.7}", label, state.lat, state.lon);
            }
            if let Some(home) = state.home {
                state.dist_home = haversine_m(home.lat, home.lon, state.lat, state.lon);
            }
        }
        MavMessage::SYS_STATUS(sys) => {
            state.voltage = sys.voltage_battery as f32 / 1000.0;
            state.sensor_health = sys.onboard_control_sensors_health.bits();
        }
        MavMessage::ATTITUDE(att) => {
            state.roll = att.roll;
            state.pitch = att.pitch;
            state.yaw = att.yaw;
        }
        MavMessage::STATUSTEXT(st) => {
            let text = status_text(&st.text);
            if text.contains("PreArm:") {
                warn!("{}: {}", label, text);
                state.ready_to_arm = false;
                state.error = text.clone();
            } else if text.contains("Ready to fly") {
                info!("{}: {}", label, text);
                state.ready_to_arm = true;
                state.error.clear();
            } else {
                info!("{}: {}", label, text);
            }
            state.status_text = text;
        }
        MavMessage::EKF_STATUS_REPORT(ekf) => {
            let before = state.ekf.health();
            state.ekf.velocity_var = ekf.velocity_variance;
            state.ekf.pos_horiz_var = ekf.pos_horiz_variance;
            state.ekf.pos_vert_var = ekf.pos_vert_variance;
            state.ekf.compass_var = ekf.compass_variance;
            state.ekf.flags = ekf.flags.bits();
            let after = state.ekf.health();
            if after != before {
                info!("{}: EKF {:?} -> {:?} (max var {:.2})", label, before, after, state.ekf.max_variance());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use falconer_proto::telemetry::EkfHealth;

    #[test]
    fn test_fix_strings() {
        assert_eq!(gps_fix_string(0), "No Fix");
        assert_eq!(gps_fix_string(1), "No Fix");
        assert_eq!(gps_fix_string(3), "3D Fix");
        assert_eq!(gps_fix_string(5), "RTK");
        assert_eq!(gps_fix_string(6), "Type 6");
    }

    #[test]
    fn test_heartbeat_mode_and_arm() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::heartbeat("GUIDED", true), "D0");
        assert_eq!(s.mode, "GUIDED");
        assert!(s.armed);
        apply(&mut s, &mock::heartbeat("RTL", false), "D0");
        assert_eq!(s.mode, "RTL");
        assert!(!s.armed);
    }

    #[test]
    fn test_gcs_heartbeat_ignored() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::heartbeat("LOITER", false), "D0");
        apply(&mut s, &mock::gcs_heartbeat(), "D0");
        assert_eq!(s.mode, "LOITER");
    }

    #[test]
    fn test_gps_raw() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::gps_raw(3, 14, 0.9), "D0");
        assert_eq!(s.gps_fix, 3);
        assert_eq!(s.gps_sats, 14);
        assert!((s.gps_hdop - 0.9).abs() < 0.001);
        assert_eq!(s.gps_string, "3D Fix");
    }

    #[test]
    fn test_status_text_readiness() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::status_text("PreArm: Need 3D Fix"), "D0");
        assert!(!s.ready_to_arm);
        assert_eq!(s.error, "PreArm: Need 3D Fix");
        assert_eq!(s.status_text, "PreArm: Need 3D Fix");

        apply(&mut s, &mock::status_text("EKF3 IMU0 is using GPS"), "D0");
        assert_eq!(s.error, "PreArm: Need 3D Fix");
        assert_eq!(s.status_text, "EKF3 IMU0 is using GPS");

        apply(&mut s, &mock::status_text("Ready to fly"), "D0");
        assert!(s.ready_to_arm);
        assert!(s.error.is_empty());
    }

    #[test]
    fn test_velocity_and_climb() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::global_position_vel(47.0, 8.0, 5.0, 300, 400, -150), "D0");
        assert!((s.ground_speed - 5.0).abs() < 0.001);
        assert!((s.climb - 1.5).abs() < 0.001);
    }

    #[test]
    fn test_ekf_report() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::ekf_report(0.9, 0.1, 0.1, 0.1), "D0");
        assert_eq!(s.ekf.health(), EkfHealth::Bad);
        apply(&mut s, &mock::ekf_report(0.2, 0.1, 0.1, 0.1), "D0");
        assert_eq!(s.ekf.health(), EkfHealth::Normal);
    }

    #[test]
    fn test_sys_status_voltage() {
        let mut s = VehicleState::new(1);
        apply(&mut s, &mock::sys_status(12_600), "D0");
        assert!((s.voltage - 12.6).abs() < 0.001);
    }
}
