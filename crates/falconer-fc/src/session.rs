use mavlink::ardupilotmega::MavMessage;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc::error::TryRecvError, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::autodetect;
use crate::command::{Commander, LinkSlot, MSG_ATTITUDE};
use crate::error::FcError;
use crate::failsafe;
use crate::link::{self, Connection, LinkOpener, MavLink};
use crate::store::TelemetryStore;
use crate::FcConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    LinkLost,
}

/// Owns one vehicle's link: connects (and reconnects), runs the periodic I/O
/// loop and keeps the [`TelemetryStore`] current.
pub struct Session {
    cfg: FcConfig,
    store: TelemetryStore,
    link: LinkSlot,
    commander: Arc<Commander>,
    opener: LinkOpener,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(cfg: FcConfig) -> Self {
        Self::with_opener(cfg, MavLink::opener())
    }

    pub fn with_opener(cfg: FcConfig, opener: LinkOpener) -> Self {
        let store = TelemetryStore::new(cfg.vehicle_id);
        let link: LinkSlot = Arc::new(RwLock::new(None));
        let commander = Arc::new(Commander::new(store.clone(), link.clone()));
        let (shutdown, _) = watch::channel(false);
        Self { cfg, store, link, commander, opener, shutdown, tasks: Mutex::new(Vec::new()) }
    }

    pub fn store(&self) -> TelemetryStore {
        self.store.clone()
    }

    pub fn commander(&self) -> Arc<Commander> {
        self.commander.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Spawn the connection loop. No-op when already running.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);

        let worker = Worker {
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            link: self.link.clone(),
            commander: self.commander.clone(),
            opener: self.opener.clone(),
        };
        tasks.push(tokio::spawn(worker.run(self.shutdown.subscribe())));

        if self.cfg.ekf_failsafe {
            info!("{}: EKF failsafe enabled", self.store.label());
            tasks.push(tokio::spawn(failsafe::run(self.commander.clone(), self.shutdown.subscribe())));
        }
    }

    /// Signal the loop, wait for it to exit, drop the link.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                warn!("{}: session task ended abnormally: {}", self.store.label(), e);
            }
        }
        *self.link.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.store.set_connected(false);
        info!("{}: session stopped", self.store.label());
    }
}

/// Resolves once shutdown has been requested (or the session is gone).
pub(crate) async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct Worker {
    cfg: FcConfig,
    store: TelemetryStore,
    link: LinkSlot,
    commander: Arc<Commander>,
    opener: LinkOpener,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let label = self.store.label().to_string();
        loop {
            let attempt = tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                res = self.connect_once() => res,
            };
            match attempt {
                Ok(conn) => {
                    let exit = self.serve(conn, &mut shutdown).await;
                    self.detach();
                    if exit == Exit::Shutdown {
                        break;
                    }
                    warn!("{}: link lost, reconnecting", label);
                }
                Err(e) => warn!("{}: connect failed: {}", label, e),
            }
            tokio::select! {
                _ = wait_shutdown(&mut shutdown) => break,
                _ = tokio::time::sleep(self.cfg.reconnect_backoff()) => {}
            }
        }
        debug!("{}: session loop exit", label);
    }

    async fn connect_once(&self) -> Result<Connection, FcError> {
        let label = self.store.label();
        if self.cfg.autodetect {
            let devs = self.cfg.candidate_devs.clone().unwrap_or_else(autodetect::default_candidate_devs);
            let bauds = self.cfg.candidate_bauds.clone().unwrap_or_else(autodetect::default_candidate_bauds);
            let res = autodetect::autodetect_fc(
                &self.opener,
                &devs,
                &bauds,
                self.cfg.heartbeat_timeout(),
                self.cfg.sys_id,
                self.cfg.comp_id,
                label,
            )
            .await;
            let probes = res.probes.len();
            return res.connection.ok_or(FcError::NotFound { probes });
        }

        let endpoint = self.cfg.resolved_endpoint().ok_or(FcError::NoEndpoint)?;
        info!("{}: connecting to {}", label, endpoint);
        link::connect(
            &self.opener,
            &endpoint,
            self.cfg.sys_id,
            self.cfg.comp_id,
            self.cfg.heartbeat_timeout(),
            label,
        )
        .await
    }

    async fn serve(&self, conn: Connection, shutdown: &mut watch::Receiver<bool>) -> Exit {
        let label = self.store.label();
        let Connection { endpoint, link, mut rx, target_system, target_component, heartbeat } = conn;

        self.store.set_link(true, target_system, target_component);
        self.store.ingest(&heartbeat);
        *self.link.write().unwrap_or_else(|e| e.into_inner()) = Some(link);
        info!("{}: connected to system {} via {}", label, target_system, endpoint);
        if let Err(e) = self.commander.subscribe_streams() {
            warn!("{}: stream request failed: {}", label, e);
        }

        let mut tick = tokio::time::interval(self.cfg.loop_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = LinkWatchdog::new(Instant::now(), self.cfg.stall_timeout(), self.cfg.prearm_poll());

        loop {
            tokio::select! {
                _ = wait_shutdown(shutdown) => return Exit::Shutdown,
                _ = tick.tick() => {}
            }
            let now = Instant::now();

            if let Err(e) = self.commander.send_heartbeat() {
                warn!("{}: loop error: {}", label, e);
            }

            loop {
                match rx.try_recv() {
                    Ok((hdr, msg)) => {
                        if hdr.system_id != target_system {
                            continue;
                        }
                        if matches!(msg, MavMessage::ATTITUDE(_)) {
                            watchdog.saw_attitude(now);
                        }
                        self.store.ingest(&msg);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("{}: {}", label, FcError::LinkClosed(endpoint.clone()));
                        return Exit::LinkLost;
                    }
                }
            }

            if watchdog.prearm_due(now) {
                if let Err(e) = self.commander.trigger_prearm_checks() {
                    warn!("{}: loop error: {}", label, e);
                }
            }

            if watchdog.stall_due(now) {
                warn!("{}: telemetry stalled, re-requesting streams", label);
                let res = self
                    .commander
                    .request_all_streams()
                    .and_then(|_| self.commander.request_message_interval(MSG_ATTITUDE, 10.0));
                if let Err(e) = res {
                    warn!("{}: loop error: {}", label, e);
                }
            }
        }
    }

    fn detach(&self) {
        *self.link.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.store.set_connected(false);
    }
}

/// Timers for the two periodic link chores: pre-arm re-triggering and
/// re-requesting streams when ATTITUDE stops arriving.
#[derive(Debug)]
pub struct LinkWatchdog {
    stall_timeout: Duration,
    prearm_poll: Duration,
    last_attitude: Instant,
    last_prearm: Option<Instant>,
}

impl LinkWatchdog {
    pub fn new(now: Instant, stall_timeout: Duration, prearm_poll: Duration) -> Self {
        Self { stall_timeout, prearm_poll, last_attitude: now, last_prearm: None }
    }

    pub fn saw_attitude(&mut self, now: Instant) {
        self.last_attitude = now;
    }

    pub fn prearm_due(&mut self, now: Instant) -> bool {
        let due = self.last_prearm.map_or(true, |t| now.duration_since(t) >= self.prearm_poll);
        if due {
            self.last_prearm = Some(now);
        }
        due
    }

    /// True once per stall period while ATTITUDE is missing.
    pub fn stall_due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_attitude) > self.stall_timeout {
            self.last_attitude = now;
            return true;
        }
        false
    }
}
