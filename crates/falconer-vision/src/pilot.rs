use falconer_fc::{modes, Commander};
use falconer_nav::MissionController;
use falconer_proto::event::{GeotagRecord, InterceptPhase};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::evidence::EvidenceWriter;
use crate::intercept::{InterceptAction, InterceptController};
use crate::{best_target, Detection, Detector, Frame, FrameSource, InterceptConfig};

const EVENT_QUEUE: usize = 64;

/// Notifications for the display side, in emission order.
#[derive(Debug, Clone)]
pub enum VisionEvent {
    /// One analysed frame.
    Frame { phase: InterceptPhase, detections: Vec<Detection> },
    Geotag(GeotagRecord),
}

struct PilotState {
    controller: InterceptController,
    last_frame: Option<Frame>,
}

/// Runs the intercept state machine against live frames and carries out its
/// actions through the command interface and the mission's pause/resume.
pub struct InterceptPilot {
    cfg: InterceptConfig,
    commander: Arc<Commander>,
    mission: Option<Arc<MissionController>>,
    state: Mutex<PilotState>,
    geotags: Mutex<Vec<GeotagRecord>>,
    evidence: EvidenceWriter,
    events: mpsc::Sender<VisionEvent>,
}

impl InterceptPilot {
    pub fn new(
        cfg: InterceptConfig,
        commander: Arc<Commander>,
        mission: Option<Arc<MissionController>>,
    ) -> (Arc<Self>, mpsc::Receiver<VisionEvent>) {
        let (events, rx) = mpsc::channel(EVENT_QUEUE);
        let controller = InterceptController::new(&cfg, commander.store().label());
        let evidence = EvidenceWriter::new(cfg.evidence_dir.clone());
        let pilot = Arc::new(Self {
            cfg,
            commander,
            mission,
            state: Mutex::new(PilotState { controller, last_frame: None }),
            geotags: Mutex::new(Vec::new()),
            evidence,
            events,
        });
        (pilot, rx)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PilotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Disabling mid-track stops the vehicle and resumes a paused mission.
    pub fn set_enabled(&self, enabled: bool) {
        let action = self.state().controller.set_enabled(enabled);
        if action == Some(InterceptAction::Disengage) {
            info!("{}: intercept disabled mid-track, handing back to mission", self.label());
            if let Err(e) = self.disengage() {
                warn!("{}: intercept command failed: {}", self.label(), e);
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state().controller.is_enabled()
    }

    pub fn phase(&self) -> InterceptPhase {
        self.state().controller.phase()
    }

    /// Append-only geotag log.
    pub fn geotags(&self) -> Vec<GeotagRecord> {
        self.geotags.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Feed one analysed frame through the state machine and act on the result.
    pub async fn on_frame(&self, frame: Frame, detections: Vec<Detection>) {
        let now = Instant::now();
        let centroid = best_target(&detections, self.cfg.target_class(), self.cfg.conf_threshold())
            .map(|d| (d.cx, d.cy));

        let (action, phase) = {
            let mut st = self.state();
            st.last_frame = Some(frame);
            let action = st.controller.step(now, centroid);
            (action, st.controller.phase())
        };

        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.events.try_send(VisionEvent::Frame { phase, detections })
        {
            debug!("{}: frame event dropped", self.label());
        }

        if let Some(action) = action {
            self.act(action).await;
        }
    }

    fn label(&self) -> &str {
        self.commander.store().label()
    }

    fn mission_running(&self) -> Option<&MissionController> {
        self.mission.as_deref().filter(|m| m.is_running())
    }

    async fn act(&self, action: InterceptAction) {
        let res = match action {
            InterceptAction::Engage => {
                info!("{}: target sighted, engaging", self.label());
                if let Some(mission) = self.mission_running() {
                    if let Err(e) = mission.pause().await {
                        warn!("{}: mission pause: {}", self.label(), e);
                    }
                }
                self.commander.set_mode(modes::GUIDED)
            }
            InterceptAction::Steer { vy, vz } => self.commander.send_velocity(0.0, vy, vz),
            InterceptAction::Brake => self.commander.send_velocity(0.0, 0.0, 0.0),
            InterceptAction::Disengage => {
                info!("{}: target lost, back to search", self.label());
                self.disengage()
            }
            InterceptAction::Geotag => {
                self.geotag().await;
                Ok(())
            }
        };
        if let Err(e) = res {
            warn!("{}: intercept command failed: {}", self.label(), e);
        }
    }

    fn disengage(&self) -> Result<(), falconer_fc::CommandError> {
        self.commander.send_velocity(0.0, 0.0, 0.0).and_then(|_| self.resume_mission())
    }

    fn resume_mission(&self) -> Result<(), falconer_fc::CommandError> {
        match self.mission_running() {
            Some(mission) => mission.resume(),
            None => Ok(()),
        }
    }

    async fn geotag(&self) {
        let s = self.commander.store().snapshot();
        let record = GeotagRecord {
            vehicle_id: s.vehicle_id,
            lat: s.lat,
            lon: s.lon,
            alt: s.alt_rel,
            ts_unix_ms: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
        };
        info!(
            "{}: GEOTAG {:.7}, {:.7} at {:.1} m",
            self.label(),
            record.lat,
            record.lon,
            record.alt
        );
        self.geotags.lock().unwrap_or_else(|e| e.into_inner()).push(record.clone());
        // the log above is authoritative; the display copy may be dropped
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(VisionEvent::Geotag(record.clone())) {
            warn!("{}: geotag event dropped, display not draining", self.label());
        }

        let frame = self.state().last_frame.clone();
        self.evidence.save(frame, &record);

        if let Err(e) = self.commander.send_velocity(0.0, 0.0, 0.0) {
            warn!("{}: geotag hold: {}", self.label(), e);
        }
        tokio::time::sleep(self.cfg.geotag_hold()).await;
        if let Err(e) = self.resume_mission() {
            warn!("{}: mission resume: {}", self.label(), e);
        }
        self.state().controller.geotag_done();
    }

    /// Pull frames at the configured rate until the source ends or shutdown.
    /// Capture and detection run on the blocking pool.
    pub fn spawn(
        self: &Arc<Self>,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pilot = self.clone();
        tokio::spawn(async move {
            let mut io = Some((source, detector));
            let mut tick = tokio::time::interval(pilot.cfg.frame_period());
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    res = shutdown.changed() => {
                        if res.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = tick.tick() => {}
                }
                let Some((mut source, mut detector)) = io.take() else {
                    break;
                };
                let res = tokio::task::spawn_blocking(move || {
                    let out = source.next_frame().and_then(|frame| match frame {
                        Some(frame) => detector.detect(&frame).map(|dets| Some((frame, dets))),
                        None => Ok(None),
                    });
                    (source, detector, out)
                })
                .await;
                let (source, detector, out) = match res {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("{}: vision worker failed: {}", pilot.label(), e);
                        break;
                    }
                };
                io = Some((source, detector));
                match out {
                    Ok(Some((frame, dets))) => pilot.on_frame(frame, dets).await,
                    Ok(None) => {
                        info!("{}: frame source ended", pilot.label());
                        break;
                    }
                    Err(e) => warn!("{}: frame skipped: {:#}", pilot.label(), e),
                }
            }
            pilot.evidence.flush().await;
            debug!("{}: intercept loop exit", pilot.label());
        })
    }
}
