use falconer_proto::event::InterceptPhase;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::InterceptConfig;

/// Side effects requested by one frame. Executed by the pilot loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterceptAction {
    /// First sighting: pause any mission, take GUIDED.
    Engage,
    /// Lateral / vertical correction, m/s (NED: +vy east, +vz down).
    Steer { vy: f32, vz: f32 },
    Brake,
    /// Target gone: stop and hand back to the mission.
    Disengage,
    /// Dwell complete: record the position. Call
    /// [`InterceptController::geotag_done`] when finished.
    Geotag,
}

/// SEARCH -> TRACK -> LOCK -> GEOTAG -> SEARCH, stepped once per frame with
/// the target centroid (or `None`).
#[derive(Debug)]
pub struct InterceptController {
    phase: InterceptPhase,
    enabled: bool,
    locked_since: Option<Instant>,
    last_detection: Option<Instant>,

    frame_w: f32,
    frame_h: f32,
    deadzone: f32,
    dwell: Duration,
    lost: Duration,
    lateral_gain: f32,
    vertical_gain: f32,
    max_speed: f32,
    label: String,
}

impl InterceptController {
    pub fn new(cfg: &InterceptConfig, label: &str) -> Self {
        let (w, h) = cfg.frame_size();
        let (lateral_gain, vertical_gain) = cfg.gains();
        Self {
            phase: InterceptPhase::Search,
            enabled: false,
            locked_since: None,
            last_detection: None,
            frame_w: w as f32,
            frame_h: h as f32,
            deadzone: cfg.deadzone(),
            dwell: cfg.dwell(),
            lost: cfg.lost_timeout(),
            lateral_gain,
            vertical_gain,
            max_speed: cfg.max_speed(),
            label: label.to_string(),
        }
    }

    pub fn phase(&self) -> InterceptPhase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabling drops any track in progress. Returns `Disengage` when a
    /// track was active so the caller can hand control back to the mission.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<InterceptAction> {
        if self.enabled == enabled {
            return None;
        }
        self.enabled = enabled;
        info!("{}: intercept {}", self.label, if enabled { "enabled" } else { "disabled" });
        if enabled {
            return None;
        }
        let active = self.phase != InterceptPhase::Search;
        self.set_phase(InterceptPhase::Search);
        self.locked_since = None;
        active.then_some(InterceptAction::Disengage)
    }

    pub fn locked_since(&self) -> Option<Instant> {
        self.locked_since
    }

    pub fn last_detection(&self) -> Option<Instant> {
        self.last_detection
    }

    fn set_phase(&mut self, phase: InterceptPhase) {
        if phase != self.phase {
            info!("{}: intercept {} -> {}", self.label, self.phase, phase);
            self.phase = phase;
        }
    }

    /// Pixel error of `centroid` from the frame centre (+x right, +y down).
    pub fn centroid_error(&self, centroid: (f32, f32)) -> (f32, f32) {
        (centroid.0 - self.frame_w / 2.0, centroid.1 - self.frame_h / 2.0)
    }

    fn in_deadzone(&self, err: (f32, f32)) -> bool {
        err.0.abs() < self.deadzone && err.1.abs() < self.deadzone
    }

    pub fn step(&mut self, now: Instant, centroid: Option<(f32, f32)>) -> Option<InterceptAction> {
        if !self.enabled {
            return None;
        }
        if centroid.is_some() {
            self.last_detection = Some(now);
        }

        match self.phase {
            InterceptPhase::Search => {
                centroid?;
                self.set_phase(InterceptPhase::Track);
                Some(InterceptAction::Engage)
            }
            InterceptPhase::Track => {
                let Some(c) = centroid else {
                    let lost = self.last_detection.map_or(true, |t| now.duration_since(t) > self.lost);
                    if lost {
                        self.set_phase(InterceptPhase::Search);
                        return Some(InterceptAction::Disengage);
                    }
                    return None;
                };
                let err = self.centroid_error(c);
                if self.in_deadzone(err) {
                    self.locked_since = Some(now);
                    self.set_phase(InterceptPhase::Lock);
                    return Some(InterceptAction::Brake);
                }
                let clamp = |v: f32| v.clamp(-self.max_speed, self.max_speed);
                Some(InterceptAction::Steer {
                    vy: clamp(err.0 * self.lateral_gain),
                    vz: clamp(err.1 * self.vertical_gain),
                })
            }
            InterceptPhase::Lock => {
                let centred = centroid.map(|c| self.in_deadzone(self.centroid_error(c)));
                if centred != Some(true) {
                    self.locked_since = None;
                    self.set_phase(InterceptPhase::Track);
                    return None;
                }
                let held = self.locked_since.map_or(Duration::ZERO, |t| now.duration_since(t));
                if held >= self.dwell {
                    self.set_phase(InterceptPhase::Geotag);
                    return Some(InterceptAction::Geotag);
                }
                None
            }
            // geotag in progress
            InterceptPhase::Geotag => None,
        }
    }

    pub fn geotag_done(&mut self) {
        self.locked_since = None;
        self.set_phase(InterceptPhase::Search);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTRE: (f32, f32) = (160.0, 120.0);

    fn ctl() -> InterceptController {
        let mut c = InterceptController::new(&InterceptConfig::default(), "D0");
        c.set_enabled(true);
        c
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let mut c = InterceptController::new(&InterceptConfig::default(), "D0");
        assert_eq!(c.step(Instant::now(), Some(CENTRE)), None);
        assert_eq!(c.phase(), InterceptPhase::Search);
        assert!(c.last_detection().is_none());
    }

    #[test]
    fn test_engage_stamps_detection() {
        let mut c = ctl();
        let t0 = Instant::now();
        assert_eq!(c.step(t0, None), None);
        assert_eq!(c.step(t0, Some((300.0, 200.0))), Some(InterceptAction::Engage));
        assert_eq!(c.phase(), InterceptPhase::Track);
        assert_eq!(c.last_detection(), Some(t0));
        // one dropped frame right after engaging does not abandon the track
        assert_eq!(c.step(t0 + ms(70), None), None);
        assert_eq!(c.phase(), InterceptPhase::Track);
    }

    #[test]
    fn test_steer_proportional_and_clamped() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        match c.step(t0, Some((260.0, 170.0))) {
            Some(InterceptAction::Steer { vy, vz }) => {
                assert!((vy - 0.5).abs() < 1e-6);
                assert!((vz - 0.1).abs() < 1e-6);
            }
            other => panic!("unexpected {:?}", other),
        }
        let mut wide = InterceptController::new(
            &InterceptConfig { frame_w: Some(1280), lateral_gain: Some(0.01), ..Default::default() },
            "D0",
        );
        wide.set_enabled(true);
        wide.step(t0, Some((0.0, 120.0)));
        assert_eq!(wide.step(t0, Some((0.0, 120.0))), Some(InterceptAction::Steer { vy: -1.0, vz: 0.0 }));
    }

    #[test]
    fn test_deadzone_edge_is_outside() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        assert!(matches!(c.step(t0, Some((190.0, 120.0))), Some(InterceptAction::Steer { .. })));
        assert_eq!(c.step(t0, Some((189.0, 120.0))), Some(InterceptAction::Brake));
        assert_eq!(c.phase(), InterceptPhase::Lock);
    }

    #[test]
    fn test_lost_track_disengages() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some((10.0, 10.0)));
        assert_eq!(c.step(t0 + ms(2000), None), None);
        assert_eq!(c.step(t0 + ms(2001), None), Some(InterceptAction::Disengage));
        assert_eq!(c.phase(), InterceptPhase::Search);
    }

    #[test]
    fn test_dwell_reaches_geotag() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        assert_eq!(c.step(t0, Some(CENTRE)), Some(InterceptAction::Brake));
        let mut geotags = 0;
        for i in 1..=10 {
            if c.step(t0 + ms(100 * i), Some(CENTRE)) == Some(InterceptAction::Geotag) {
                geotags += 1;
            }
        }
        assert_eq!(geotags, 1);
        assert_eq!(c.phase(), InterceptPhase::Geotag);
        assert_eq!(c.step(t0 + ms(1100), Some(CENTRE)), None);
        c.geotag_done();
        assert_eq!(c.phase(), InterceptPhase::Search);
    }

    #[test]
    fn test_drift_just_before_dwell_returns_to_track() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        c.step(t0, Some(CENTRE));
        assert_eq!(c.step(t0 + ms(500), Some(CENTRE)), None);
        assert_eq!(c.step(t0 + ms(990), Some((200.0, 120.0))), None);
        assert_eq!(c.phase(), InterceptPhase::Track);
        assert!(c.locked_since().is_none());
        // a fresh lock has to be earned from scratch
        assert_eq!(c.step(t0 + ms(1000), Some(CENTRE)), Some(InterceptAction::Brake));
        assert_eq!(c.step(t0 + ms(1500), Some(CENTRE)), None);
        assert_eq!(c.step(t0 + ms(2000), Some(CENTRE)), Some(InterceptAction::Geotag));
    }

    #[test]
    fn test_lock_lost_detection_falls_back() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        c.step(t0, Some(CENTRE));
        assert_eq!(c.step(t0 + ms(100), None), None);
        assert_eq!(c.phase(), InterceptPhase::Track);
    }

    #[test]
    fn test_disable_resets() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        assert_eq!(c.set_enabled(false), Some(InterceptAction::Disengage));
        assert_eq!(c.phase(), InterceptPhase::Search);
        assert_eq!(c.step(t0, Some(CENTRE)), None);
    }

    #[test]
    fn test_disable_mid_lock_disengages_once() {
        let mut c = ctl();
        let t0 = Instant::now();
        c.step(t0, Some(CENTRE));
        c.step(t0, Some(CENTRE));
        assert_eq!(c.phase(), InterceptPhase::Lock);
        assert_eq!(c.set_enabled(false), Some(InterceptAction::Disengage));
        assert!(c.locked_since().is_none());
        assert_eq!(c.set_enabled(false), None);
        // idle controller has nothing to hand back
        assert_eq!(c.set_enabled(true), None);
        assert_eq!(c.set_enabled(false), None);
    }
}
