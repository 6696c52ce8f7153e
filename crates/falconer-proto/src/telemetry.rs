use serde::{Deserialize, Serialize};

/// Latched home position (first 3D fix, or an operator override).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomePosition {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EkfHealth {
    NoData,
    Normal,
    Caution,
    Bad,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EkfStatus {
    pub velocity_var: f32,
    pub pos_horiz_var: f32,
    pub pos_vert_var: f32,
    pub compass_var: f32,
    pub flags: u16,
}

impl EkfStatus {
    pub fn max_variance(&self) -> f32 {
        self.velocity_var
            .max(self.pos_horiz_var)
            .max(self.pos_vert_var)
            .max(self.compass_var)
    }

    /// Variance bands: < 0.5 normal, < 0.8 caution (still flyable), otherwise bad.
    pub fn health(&self) -> EkfHealth {
        let max_var = self.max_variance();
        if self.flags == 0 && max_var == 0.0 {
            EkfHealth::NoData
        } else if max_var < 0.5 {
            EkfHealth::Normal
        } else if max_var < 0.8 {
            EkfHealth::Caution
        } else {
            EkfHealth::Bad
        }
    }
}

/// Snapshot of everything the ground station knows about one vehicle.
///
/// Always handed out by value; nobody outside the session holds a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    // identity / link
    pub vehicle_id: u8,
    pub connected: bool,
    pub target_system: u8,
    pub target_component: u8,

    // navigation mode
    pub mode: String,
    pub armed: bool,
    pub system_status: u8,

    // position / velocity
    pub lat: f64,
    pub lon: f64,
    pub alt_rel: f32,
    pub ground_speed: f32,
    pub climb: f32,
    pub heading: f32,

    // attitude, radians
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,

    // GPS quality
    pub gps_fix: u8,
    pub gps_sats: u8,
    pub gps_hdop: f32,
    pub gps_string: String,

    // estimator
    pub ekf: EkfStatus,
    pub sensor_health: u32,

    // readiness, derived from firmware status text
    pub ready_to_arm: bool,
    pub error: String,
    pub status_text: String,

    pub home: Option<HomePosition>,
    pub dist_home: f64,

    pub voltage: f32,
}

impl VehicleState {
    pub fn new(vehicle_id: u8) -> Self {
        Self {
            vehicle_id,
            connected: false,
            target_system: 1,
            target_component: 1,
            mode: "UNKNOWN".into(),
            armed: false,
            system_status: 0,
            lat: 0.0,
            lon: 0.0,
            alt_rel: 0.0,
            ground_speed: 0.0,
            climb: 0.0,
            heading: 0.0,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            gps_fix: 0,
            gps_sats: 0,
            gps_hdop: 100.0,
            gps_string: "No Fix".into(),
            ekf: EkfStatus::default(),
            sensor_health: 0,
            ready_to_arm: false,
            error: String::new(),
            status_text: String::new(),
            home: None,
            dist_home: 0.0,
            voltage: 0.0,
        }
    }

    /// Short log label, `D0` for vehicle 1.
    pub fn label(&self) -> String {
        vehicle_label(self.vehicle_id)
    }

    pub fn has_3d_fix(&self) -> bool {
        self.gps_fix >= 3
    }

    pub fn has_position(&self) -> bool {
        self.lat != 0.0 && self.lon != 0.0
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::new(1)
    }
}

pub fn vehicle_label(vehicle_id: u8) -> String {
    format!("D{}", vehicle_id.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ekf_health_bands() {
        let mut ekf = EkfStatus::default();
        assert_eq!(ekf.health(), EkfHealth::NoData);

        ekf.flags = 0x1ff;
        assert_eq!(ekf.health(), EkfHealth::Normal);

        ekf.compass_var = 0.6;
        assert_eq!(ekf.health(), EkfHealth::Caution);

        ekf.pos_horiz_var = 0.8;
        assert_eq!(ekf.health(), EkfHealth::Bad);
    }

    #[test]
    fn test_variance_without_flags_is_data() {
        let ekf = EkfStatus { velocity_var: 0.1, ..Default::default() };
        assert_eq!(ekf.health(), EkfHealth::Normal);
    }

    #[test]
    fn test_vehicle_label() {
        assert_eq!(VehicleState::new(1).label(), "D0");
        assert_eq!(VehicleState::new(2).label(), "D1");
    }
}
