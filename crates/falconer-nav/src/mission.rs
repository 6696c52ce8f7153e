use falconer_fc::{modes, CommandError, Commander};
use falconer_proto::event::MissionPhase;
use falconer_proto::telemetry::VehicleState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::leg::{Leg, LegAction};
use crate::waypoints::{Waypoint, WaypointList};
use crate::{MissionConfig, VehicleRole};

const PAUSE_FLOOD: usize = 3;
const PAUSE_FLOOD_GAP: Duration = Duration::from_millis(50);
const RESUME_BURST: usize = 3;
const RESUME_BURST_GAP: Duration = Duration::from_millis(100);
const MODE_RESTORE_SETTLE: Duration = Duration::from_millis(200);
const MODE_POLL: Duration = Duration::from_millis(200);
const ARM_POLL: Duration = Duration::from_millis(500);
const CLIMB_POLL: Duration = Duration::from_millis(500);
const AIRBORNE_ALT_M: f32 = 2.0;
const CLIMB_DONE_RATIO: f32 = 0.9;

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("not connected")]
    NotConnected,
    #[error("no waypoints")]
    NoWaypoints,
    #[error("no 3D GPS fix")]
    NoGpsFix,
    #[error("home not set")]
    NoHome,
    #[error("a mission run is already active")]
    Busy,
    #[error("mode {mode} not confirmed within {timeout:?}")]
    ModeTimeout { mode: String, timeout: Duration },
    #[error("not armed within {0:?}")]
    ArmTimeout(Duration),
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Pause/resume state shared between the run and its controllers.
///
/// `paused` is level-triggered; `resumed` is an edge consumed once by the
/// navigate loop. `cancel` ends the run at its next poll.
#[derive(Debug, Default)]
pub struct MissionSignals {
    paused: AtomicBool,
    resumed: AtomicBool,
    cancel: AtomicBool,
    wake: Notify,
}

impl MissionSignals {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn take_resumed(&self) -> bool {
        self.resumed.swap(false, Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Sleep one poll period, cut short by any signal.
    async fn nap(&self, period: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Releases the single-run guard even when the run task panics.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Guided waypoint mission for one vehicle.
pub struct MissionController {
    commander: Arc<Commander>,
    cfg: MissionConfig,
    signals: Arc<MissionSignals>,
    running: Arc<AtomicBool>,
    phase: Arc<Mutex<MissionPhase>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MissionController {
    pub fn new(commander: Arc<Commander>, cfg: MissionConfig) -> Self {
        Self {
            commander,
            cfg,
            signals: Arc::new(MissionSignals::default()),
            running: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(Mutex::new(MissionPhase::Idle)),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MissionConfig {
        &self.cfg
    }

    pub fn phase(&self) -> MissionPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.signals.is_paused()
    }

    /// Start a run over `waypoints` at `altitude` (config default when `None`).
    /// Returns once the run is spawned; follow it with [`phase`] or [`join`].
    ///
    /// [`phase`]: MissionController::phase
    /// [`join`]: MissionController::join
    pub fn execute(&self, waypoints: &WaypointList, altitude: Option<f32>) -> Result<(), MissionError> {
        let label = self.commander.store().label().to_string();
        if let Err(e) = check_preconditions(&self.commander.store().snapshot(), waypoints) {
            warn!("{}: mission not started: {}", label, e);
            return Err(e);
        }
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            warn!("{}: mission not started: {}", label, MissionError::Busy);
            return Err(MissionError::Busy);
        }
        let guard = RunGuard(self.running.clone());
        self.signals.reset();

        let run = Run {
            commander: self.commander.clone(),
            cfg: self.cfg.clone(),
            signals: self.signals.clone(),
            phase: self.phase.clone(),
            waypoints: waypoints.as_slice().to_vec(),
            alt: altitude.unwrap_or_else(|| self.cfg.altitude()),
            label: label.clone(),
        };
        let phase = self.phase.clone();
        info!("{}: mission start, {} waypoints at {:.1} m", label, run.waypoints.len(), run.alt);

        let supervisor = tokio::spawn(async move {
            let _guard = guard;
            match tokio::spawn(run.run()).await {
                Ok(Ok(())) => info!("{}: mission complete", label),
                Ok(Err(MissionError::Cancelled)) => info!("{}: mission cancelled", label),
                Ok(Err(e)) => error!("{}: mission aborted: {:#}", label, e),
                Err(e) if e.is_panic() => error!("{}: mission run panicked: {:?}", label, e),
                Err(e) => error!("{}: mission run failed: {}", label, e),
            }
            *phase.lock().unwrap_or_else(|e| e.into_inner()) = MissionPhase::Idle;
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(supervisor);
        Ok(())
    }

    /// Stop navigating: GUIDED, a burst of zero-velocity holds, then hold at
    /// 1 Hz until resumed. Idempotent.
    pub async fn pause(&self) -> Result<(), CommandError> {
        self.signals.paused.store(true, Ordering::SeqCst);
        self.signals.wake.notify_one();
        info!("{}: mission paused", self.commander.store().label());
        self.commander.set_mode(modes::GUIDED)?;
        for _ in 0..PAUSE_FLOOD {
            self.commander.send_velocity(0.0, 0.0, 0.0)?;
            tokio::time::sleep(PAUSE_FLOOD_GAP).await;
        }
        Ok(())
    }

    /// Continue towards the current target. Harmless when not paused.
    pub fn resume(&self) -> Result<(), CommandError> {
        info!("{}: mission resumed", self.commander.store().label());
        let res = self.commander.set_mode(modes::GUIDED);
        self.signals.paused.store(false, Ordering::SeqCst);
        self.signals.resumed.store(true, Ordering::SeqCst);
        self.signals.wake.notify_one();
        res
    }

    /// Wait for the current run (if any) to finish.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("{}: mission supervisor: {}", self.commander.store().label(), e);
            }
        }
    }

    /// Cancel the run at its next poll and wait for it.
    pub async fn stop(&self) {
        self.signals.cancel.store(true, Ordering::SeqCst);
        self.signals.wake.notify_one();
        self.join().await;
    }
}

fn check_preconditions(state: &VehicleState, waypoints: &WaypointList) -> Result<(), MissionError> {
    if !state.connected {
        return Err(MissionError::NotConnected);
    }
    if waypoints.is_empty() {
        return Err(MissionError::NoWaypoints);
    }
    if !state.has_3d_fix() {
        return Err(MissionError::NoGpsFix);
    }
    if state.home.is_none() {
        return Err(MissionError::NoHome);
    }
    Ok(())
}

struct Run {
    commander: Arc<Commander>,
    cfg: MissionConfig,
    signals: Arc<MissionSignals>,
    phase: Arc<Mutex<MissionPhase>>,
    waypoints: Vec<Waypoint>,
    alt: f32,
    label: String,
}

impl Run {
    async fn run(self) -> Result<(), MissionError> {
        self.enter(MissionPhase::ModeSwitch);
        self.commander.set_mode(modes::GUIDED)?;
        let timeout = self.cfg.mode_timeout();
        if !self.wait_for(timeout, MODE_POLL, |s| s.mode == modes::GUIDED).await? {
            return Err(MissionError::ModeTimeout { mode: modes::GUIDED.into(), timeout });
        }

        self.arm_and_takeoff().await?;

        let total = self.waypoints.len();
        for (index, wp) in self.waypoints.iter().enumerate() {
            self.enter(MissionPhase::Navigate { index, total });
            self.navigate(*wp).await?;
        }

        self.enter(MissionPhase::Terminal);
        match self.cfg.role {
            VehicleRole::Secondary => {
                info!("{}: route done, returning to launch", self.label);
                self.commander.set_mode(modes::RTL)?;
            }
            VehicleRole::Primary => {
                info!("{}: route done, holding at last waypoint", self.label);
            }
        }
        Ok(())
    }

    fn enter(&self, phase: MissionPhase) {
        info!("{}: mission phase {}", self.label, phase);
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    async fn arm_and_takeoff(&self) -> Result<(), MissionError> {
        let s = self.commander.store().snapshot();
        if s.armed && s.alt_rel > AIRBORNE_ALT_M {
            info!("{}: already airborne at {:.1} m", self.label, s.alt_rel);
            return Ok(());
        }
        self.enter(MissionPhase::ArmTakeoff);

        if !s.armed {
            self.commander.arm(false)?;
            let timeout = self.cfg.arm_timeout();
            if !self.wait_for(timeout, ARM_POLL, |s| s.armed).await? {
                return Err(MissionError::ArmTimeout(timeout));
            }
            self.sleep(self.cfg.spool_up()).await?;
        }

        self.commander.takeoff(self.alt)?;
        self.sleep(self.cfg.climb_settle()).await?;
        let target = self.alt * CLIMB_DONE_RATIO;
        if !self.wait_for(self.cfg.climb_timeout(), CLIMB_POLL, |s| s.alt_rel >= target).await? {
            let alt = self.commander.store().snapshot().alt_rel;
            warn!("{}: climb not confirmed ({:.1} of {:.1} m), continuing", self.label, alt, self.alt);
        }
        Ok(())
    }

    async fn navigate(&self, wp: Waypoint) -> Result<(), MissionError> {
        self.commander.goto(wp.lat, wp.lon, self.alt)?;
        let mut leg = Leg::new(wp, self.cfg.leg_timing(), Instant::now());

        loop {
            if self.signals.is_cancelled() {
                return Err(MissionError::Cancelled);
            }
            let paused = self.signals.is_paused();
            let resumed = !paused && self.signals.take_resumed();
            let s = self.commander.store().snapshot();

            match leg.step(Instant::now(), paused, resumed, s.lat, s.lon) {
                LegAction::Wait => {}
                LegAction::Hold => self.lossy(self.commander.send_velocity(0.0, 0.0, 0.0)),
                LegAction::Resend => self.lossy(self.commander.goto(wp.lat, wp.lon, self.alt)),
                LegAction::Resume => {
                    if s.mode != modes::GUIDED {
                        self.lossy(self.commander.set_mode(modes::GUIDED));
                        tokio::time::sleep(MODE_RESTORE_SETTLE).await;
                    }
                    for _ in 0..RESUME_BURST {
                        self.lossy(self.commander.goto(wp.lat, wp.lon, self.alt));
                        tokio::time::sleep(RESUME_BURST_GAP).await;
                    }
                    continue;
                }
                LegAction::Arrived => {
                    info!("{}: reached {:.7}, {:.7}", self.label, wp.lat, wp.lon);
                    return Ok(());
                }
            }
            self.signals.nap(self.cfg.poll()).await;
        }
    }

    /// Resends are best effort; the next period retries.
    fn lossy(&self, res: Result<(), CommandError>) {
        if let Err(e) = res {
            warn!("{}: resend failed: {}", self.label, e);
        }
    }

    async fn sleep(&self, d: Duration) -> Result<(), MissionError> {
        let deadline = Instant::now() + d;
        while Instant::now() < deadline {
            if self.signals.is_cancelled() {
                return Err(MissionError::Cancelled);
            }
            self.signals.nap(deadline.saturating_duration_since(Instant::now()).min(self.cfg.poll())).await;
        }
        Ok(())
    }

    /// Poll the store until `done` holds or `timeout` passes.
    async fn wait_for(
        &self,
        timeout: Duration,
        poll: Duration,
        done: impl Fn(&VehicleState) -> bool,
    ) -> Result<bool, MissionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.commander.store().snapshot()) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            if self.signals.is_cancelled() {
                return Err(MissionError::Cancelled);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
