use falconer_proto::telemetry::{vehicle_label, HomePosition, VehicleState};
use falconer_proto::geo::haversine_m;
use mavlink::ardupilotmega::MavMessage;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::decode;

/// Shared per-vehicle telemetry.
///
/// Written by the session loop, read everywhere else through [`snapshot`].
/// The lock is only ever held for a copy or a field update.
///
/// [`snapshot`]: TelemetryStore::snapshot
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<Mutex<VehicleState>>,
    label: Arc<str>,
}

impl TelemetryStore {
    pub fn new(vehicle_id: u8) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VehicleState::new(vehicle_id))),
            label: vehicle_label(vehicle_id).into(),
        }
    }

    /// Log prefix for this vehicle (`D0`, `D1`, ...).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn snapshot(&self) -> VehicleState {
        self.lock().clone()
    }

    /// Fold one inbound message into the state.
    pub fn ingest(&self, msg: &MavMessage) {
        let mut state = self.lock();
        decode::apply(&mut state, msg, &self.label);
    }

    pub(crate) fn set_link(&self, connected: bool, target_system: u8, target_component: u8) {
        let mut state = self.lock();
        state.connected = connected;
        state.target_system = target_system;
        state.target_component = target_component;
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Replace the latched home (operator `set_home`).
    pub(crate) fn override_home(&self, lat: f64, lon: f64) {
        let mut state = self.lock();
        state.home = Some(HomePosition { lat, lon });
        state.dist_home = haversine_m(lat, lon, state.lat, state.lon);
        info!("{}: home overridden to {:.7}, {:.7}", self.label, lat, lon);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VehicleState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore").field("label", &self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = TelemetryStore::new(2);
        let mut snap = store.snapshot();
        snap.mode = "RTL".into();
        assert_eq!(store.snapshot().mode, "UNKNOWN");
        assert_eq!(store.label(), "D1");
    }

    #[test]
    fn test_home_latches_once() {
        let store = TelemetryStore::new(1);
        // no 3D fix yet: position updates, home does not latch
        store.ingest(&mock::global_position(47.0, 8.0, 0.0));
        assert!(store.snapshot().home.is_none());

        store.ingest(&mock::gps_raw(3, 12, 0.7));
        store.ingest(&mock::global_position(47.0, 8.0, 0.0));
        store.ingest(&mock::global_position(47.001, 8.0, 10.0));

        let s = store.snapshot();
        assert_eq!(s.home, Some(HomePosition { lat: 47.0, lon: 8.0 }));
        assert!((s.dist_home - 111.2).abs() < 1.0, "dist_home {}", s.dist_home);
        assert!((s.alt_rel - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_override_home_recomputes_distance() {
        let store = TelemetryStore::new(1);
        store.ingest(&mock::gps_raw(3, 12, 0.7));
        store.ingest(&mock::global_position(47.0, 8.0, 0.0));
        store.override_home(47.0, 8.0);
        assert!(store.snapshot().dist_home < 0.01);
        store.override_home(47.001, 8.0);
        let s = store.snapshot();
        assert_eq!(s.home, Some(HomePosition { lat: 47.001, lon: 8.0 }));
        assert!((s.dist_home - 111.2).abs() < 1.0);
    }

    #[test]
    fn test_poisoned_lock_still_readable() {
        let store = TelemetryStore::new(1);
        let s2 = store.clone();
        let _ = std::thread::spawn(move || {
            let _g = s2.inner.lock().unwrap();
            panic!("poison");
        })
        .join();
        store.ingest(&mock::heartbeat("LOITER", false));
        assert_eq!(store.snapshot().mode, "LOITER");
    }
}
