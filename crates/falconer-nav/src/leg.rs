use falconer_proto::geo::haversine_m;
use std::time::Duration;
use tokio::time::Instant;

use crate::waypoints::Waypoint;

#[derive(Debug, Clone, Copy)]
pub struct LegTiming {
    /// Great-circle distance below which the target counts as reached.
    pub arrival_radius_m: f64,
    /// Target resend period while flying.
    pub resend: Duration,
    /// Zero-velocity resend period while paused.
    pub hold: Duration,
}

impl Default for LegTiming {
    fn default() -> Self {
        Self {
            arrival_radius_m: 2.0,
            resend: Duration::from_secs(2),
            hold: Duration::from_secs(1),
        }
    }
}

/// What the navigate loop should do after one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegAction {
    Wait,
    /// Paused: send a zero-velocity hold.
    Hold,
    /// Just resumed: make sure of GUIDED and burst the target again.
    Resume,
    /// Periodic target resend.
    Resend,
    Arrived,
}

/// One NAVIGATE(i) leg, stepped with explicit time so it can run without a vehicle.
#[derive(Debug)]
pub struct Leg {
    target: Waypoint,
    timing: LegTiming,
    last_resend: Instant,
    last_hold: Option<Instant>,
}

impl Leg {
    /// `now` is when the first target was sent.
    pub fn new(target: Waypoint, timing: LegTiming, now: Instant) -> Self {
        Self { target, timing, last_resend: now, last_hold: None }
    }

    pub fn target(&self) -> Waypoint {
        self.target
    }

    pub fn distance_m(&self, lat: f64, lon: f64) -> f64 {
        haversine_m(lat, lon, self.target.lat, self.target.lon)
    }

    /// `resumed` must only be consumed from the control signals when not paused.
    pub fn step(&mut self, now: Instant, paused: bool, resumed: bool, lat: f64, lon: f64) -> LegAction {
        if paused {
            let due = self.last_hold.map_or(true, |t| now.duration_since(t) >= self.timing.hold);
            if due {
                self.last_hold = Some(now);
                return LegAction::Hold;
            }
            return LegAction::Wait;
        }
        self.last_hold = None;

        if resumed {
            self.last_resend = now;
            return LegAction::Resume;
        }

        if self.distance_m(lat, lon) < self.timing.arrival_radius_m {
            return LegAction::Arrived;
        }

        if now.duration_since(self.last_resend) >= self.timing.resend {
            self.last_resend = now;
            return LegAction::Resend;
        }
        LegAction::Wait
    }
}
