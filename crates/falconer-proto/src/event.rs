use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterceptPhase {
    Search,
    Track,
    Lock,
    Geotag,
}

impl fmt::Display for InterceptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterceptPhase::Search => "SEARCH",
            InterceptPhase::Track => "TRACK",
            InterceptPhase::Lock => "LOCK",
            InterceptPhase::Geotag => "GEOTAG",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissionPhase {
    Idle,
    ModeSwitch,
    ArmTakeoff,
    Navigate { index: usize, total: usize },
    Terminal,
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionPhase::Idle => f.write_str("IDLE"),
            MissionPhase::ModeSwitch => f.write_str("MODE_SWITCH"),
            MissionPhase::ArmTakeoff => f.write_str("ARM_TAKEOFF"),
            MissionPhase::Navigate { index, total } => write!(f, "NAVIGATE({}/{})", index + 1, total),
            MissionPhase::Terminal => f.write_str("TERMINAL"),
        }
    }
}

/// One confirmed target sighting. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeotagRecord {
    pub vehicle_id: u8,
    pub lat: f64,
    pub lon: f64,
    /// Meters above home.
    pub alt: f32,
    pub ts_unix_ms: i64,
}
