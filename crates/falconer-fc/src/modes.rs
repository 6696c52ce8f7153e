//! ArduCopter flight modes (HEARTBEAT custom_mode values).

pub const GUIDED: &str = "GUIDED";
pub const RTL: &str = "RTL";
pub const LAND: &str = "LAND";

pub const COPTER_MODES: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("LAND", 9),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
];

/// Modes that navigate on GPS; arming in these needs a ready firmware and good HDOP.
pub const GPS_MODES: &[&str] = &["GUIDED", "LOITER", "AUTO", "RTL", "CIRCLE", "POSHOLD"];

pub fn mode_id(name: &str) -> Option<u32> {
    COPTER_MODES.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
}

pub fn mode_name(custom_mode: u32) -> String {
    COPTER_MODES
        .iter()
        .find(|(_, id)| *id == custom_mode)
        .map(|(n, _)| n.to_string())
        .unwrap_or_else(|| format!("Mode({})", custom_mode))
}

pub fn requires_gps(mode: &str) -> bool {
    GPS_MODES.contains(&mode)
}
