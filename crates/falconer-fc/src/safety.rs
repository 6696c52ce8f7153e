use falconer_proto::telemetry::VehicleState;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::modes;

/// Highest HDOP accepted for arming in a GPS mode.
pub const ARM_MAX_HDOP: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArmBlock {
    #[error("{0}")]
    FirmwareError(String),
    #[error("waiting for 'Ready to fly' in {0}")]
    NotReady(String),
    #[error("poor GPS HDOP ({hdop:.1}) for {mode}")]
    PoorHdop { hdop: f32, mode: String },
}

/// Mode-aware arming gate.
///
/// An outstanding firmware error always blocks. GPS modes additionally need the
/// firmware's "Ready to fly" and HDOP below [`ARM_MAX_HDOP`]; manual modes only
/// need the absence of an error.
pub fn arm_gate(state: &VehicleState) -> Result<(), ArmBlock> {
    if !state.error.is_empty() {
        return Err(ArmBlock::FirmwareError(state.error.clone()));
    }
    if modes::requires_gps(&state.mode) {
        if !state.ready_to_arm {
            return Err(ArmBlock::NotReady(state.mode.clone()));
        }
        if state.gps_hdop >= ARM_MAX_HDOP {
            return Err(ArmBlock::PoorHdop { hdop: state.gps_hdop, mode: state.mode.clone() });
        }
    }
    Ok(())
}

/// Minimum spacing between repeated actions (resends, re-triggers, failsafe commands).
#[derive(Debug)]
pub struct RateLimit {
    last: Option<Instant>,
    min_interval: Duration,
}

impl RateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: None, min_interval }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        if let Some(t) = self.last {
            if now.duration_since(t) < self.min_interval { return false; }
        }
        self.last = Some(now);
        true
    }

    /// Restart the interval as if the action just happened.
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(mode: &str, ready: bool, hdop: f32, error: &str) -> VehicleState {
        let mut s = VehicleState::new(1);
        s.mode = mode.into();
        s.ready_to_arm = ready;
        s.gps_hdop = hdop;
        s.error = error.into();
        s
    }

    #[test]
    fn test_error_blocks_every_mode() {
        let s = state("STABILIZE", true, 0.8, "PreArm: Compass not calibrated");
        assert_eq!(
            arm_gate(&s),
            Err(ArmBlock::FirmwareError("PreArm: Compass not calibrated".into()))
        );
    }

    #[test]
    fn test_gps_mode_needs_ready() {
        let s = state("GUIDED", false, 0.8, "");
        assert_eq!(arm_gate(&s), Err(ArmBlock::NotReady("GUIDED".into())));
    }

    #[test]
    fn test_gps_mode_needs_hdop() {
        let s = state("LOITER", true, 2.0, "");
        assert!(matches!(arm_gate(&s), Err(ArmBlock::PoorHdop { .. })));
        let s = state("LOITER", true, 1.9, "");
        assert_eq!(arm_gate(&s), Ok(()));
    }

    #[test]
    fn test_manual_mode_ignores_gps() {
        let s = state("ALT_HOLD", false, 99.0, "");
        assert_eq!(arm_gate(&s), Ok(()));
    }

    #[test]
    fn test_rate_limit() {
        let t0 = Instant::now();
        let mut rl = RateLimit::new(Duration::from_secs(2));
        assert!(rl.allow_at(t0));
        assert!(!rl.allow_at(t0 + Duration::from_millis(1999)));
        assert!(rl.allow_at(t0 + Duration::from_secs(2)));
    }
}
