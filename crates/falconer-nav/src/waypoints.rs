use falconer_fc::{CommandError, Commander};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Operator-edited route. Duplicates and revisits are allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaypointList {
    points: Vec<Waypoint>,
}

impl WaypointList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, lat: f64, lon: f64) {
        self.points.push(Waypoint::new(lat, lon));
    }

    pub fn remove(&mut self, index: usize) -> Option<Waypoint> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    /// Returns false when `index` is out of range.
    pub fn edit(&mut self, index: usize, lat: f64, lon: f64) -> bool {
        match self.points.get_mut(index) {
            Some(wp) => {
                *wp = Waypoint::new(lat, lon);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Waypoint> {
        self.points.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Waypoint] {
        &self.points
    }

    /// Store the route on the autopilot as a takeoff / waypoints / land mission.
    pub async fn upload(&self, commander: &Commander, alt: f32) -> Result<usize, CommandError> {
        let pairs: Vec<(f64, f64)> = self.points.iter().map(|w| (w.lat, w.lon)).collect();
        commander.upload_mission(&pairs, alt).await
    }
}

impl From<Vec<Waypoint>> for WaypointList {
    fn from(points: Vec<Waypoint>) -> Self {
        Self { points }
    }
}
