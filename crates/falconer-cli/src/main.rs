use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{info, warn};

use falconer_fc::autodetect::{autodetect_fc, default_candidate_bauds, default_candidate_devs};
use falconer_fc::link::MavLink;
use falconer_fc::payload::PayloadStep;
use falconer_fc::{FcConfig, Session};
use falconer_nav::{doctor as nav_doctor, MissionConfig, MissionController, WaypointList};
use falconer_proto::event::MissionPhase;
use falconer_proto::telemetry::{vehicle_label, VehicleState};
use falconer_vision::InterceptConfig;

#[derive(Debug, Parser)]
#[command(name = "falconer", version, about = "falconer - UAV ground-station supervisor")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    Fc { #[command(subcommand)] cmd: FcCmd },
    Mission { #[command(subcommand)] cmd: MissionCmd },
    /// Release the next payload stage.
    Drop,
    /// Reduce altitude over the current position, then land.
    EmergencyLand,
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
    /// Connect and print the telemetry snapshot.
    Status {
        #[arg(long)]
        json: bool,
        /// Seconds of telemetry to collect before printing.
        #[arg(long, default_value_t = 3)]
        wait: u64,
    },
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Upload the configured waypoints as a firmware mission.
    Upload,
    /// Fly the configured waypoints in GUIDED mode.
    Run {
        /// Override mission.altitude_m
        #[arg(long)]
        alt: Option<f32>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    fc: FcConfig,
    #[serde(default)]
    mission: MissionConfig,
    #[serde(default)]
    intercept: InterceptConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
        Command::Mission { cmd } => mission_cmd(&cfg, cmd).await?,
        Command::Drop => drop_payload(&cfg).await?,
        Command::EmergencyLand => emergency_land(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    nav_doctor::check_fc(&cfg.fc)?;
    nav_doctor::check_mission(&cfg.mission)?;
    nav_doctor::check_intercept(
        cfg.intercept.deadzone(),
        cfg.intercept.frame_size(),
        cfg.intercept.dwell().as_millis() as u64,
    )?;
    cfg.intercept.check_target_class()?;

    if cfg.fc.autodetect {
        info!("doctor: fc autodetect enabled (OK)");
    }
    if cfg.mission.waypoints.is_empty() {
        warn!("doctor: no waypoints configured; mission commands will refuse to run");
    }
    if cfg.intercept.evidence_dir.is_none() {
        info!("doctor: intercept.evidence_dir unset; geotags are kept in memory only");
    }

    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = &cfg.fc;
            let devs = fc.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
            let bauds = fc.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
            let res = autodetect_fc(
                &MavLink::opener(),
                &devs,
                &bauds,
                fc.heartbeat_timeout(),
                fc.sys_id,
                fc.comp_id,
                &vehicle_label(fc.vehicle_id),
            )
            .await;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in &res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
        FcCmd::Status { json, wait } => {
            let session = connect(cfg).await?;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            let st = session.store().snapshot();
            session.stop().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&st)?);
            } else {
                print_status(&st);
            }
            Ok(())
        }
    }
}

fn print_status(st: &VehicleState) {
    println!("vehicle={} connected={} sys={} comp={}", st.label(), st.connected, st.target_system, st.target_component);
    println!("mode={} armed={} ready_to_arm={}", st.mode, st.armed, st.ready_to_arm);
    println!("gps={} sats={} hdop={:.2}", st.gps_string, st.gps_sats, st.gps_hdop);
    println!("pos={:.7},{:.7} alt_rel={:.1}m dist_home={:.1}m", st.lat, st.lon, st.alt_rel, st.dist_home);
    println!("ekf={:?} voltage={:.2}V", st.ekf.health(), st.voltage);
    if !st.error.is_empty() {
        println!("error={}", st.error);
    }
    if !st.status_text.is_empty() {
        println!("status_text={}", st.status_text);
    }
}

async fn mission_cmd(cfg: &Config, cmd: MissionCmd) -> Result<()> {
    let waypoints = WaypointList::from(cfg.mission.waypoints.clone());
    anyhow::ensure!(!waypoints.is_empty(), "mission.waypoints is empty");

    let session = connect(cfg).await?;
    let res = match cmd {
        MissionCmd::Upload => upload(&session, &waypoints, cfg.mission.altitude()).await,
        MissionCmd::Run { alt } => run_mission(&session, cfg.mission.clone(), &waypoints, alt).await,
    };
    session.stop().await;
    res
}

async fn upload(session: &Session, waypoints: &WaypointList, alt: f32) -> Result<()> {
    let items = waypoints.upload(&session.commander(), alt).await?;
    println!("uploaded {} mission items", items);
    Ok(())
}

/// What the n-th Ctrl-C (1-based) does to a running mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Pause,
    Resume,
    Stop,
}

fn on_interrupt(count: u32) -> Interrupt {
    match count {
        0 | 1 => Interrupt::Pause,
        2 => Interrupt::Resume,
        _ => Interrupt::Stop,
    }
}

async fn run_mission(session: &Session, mcfg: MissionConfig, waypoints: &WaypointList, alt: Option<f32>) -> Result<()> {
    let mission = MissionController::new(session.commander(), mcfg);
    mission.execute(waypoints, alt)?;

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let mut last_phase = MissionPhase::Idle;
    let mut interrupts = 0u32;

    while mission.is_running() {
        tokio::select! {
            _ = poll.tick() => {
                let phase = mission.phase();
                if phase != last_phase {
                    println!("phase={}", phase);
                    last_phase = phase;
                }
            }
            res = tokio::signal::ctrl_c() => {
                res.context("install ctrl-c handler")?;
                interrupts += 1;
                match on_interrupt(interrupts) {
                    Interrupt::Pause => {
                        warn!("ctrl-c: pausing mission (again to resume)");
                        if let Err(e) = mission.pause().await {
                            warn!("pause failed: {}", e);
                        }
                    }
                    Interrupt::Resume => {
                        warn!("ctrl-c: resuming mission (again to stop)");
                        if let Err(e) = mission.resume() {
                            warn!("resume failed: {}", e);
                        }
                    }
                    Interrupt::Stop => {
                        warn!("ctrl-c: stopping");
                        mission.stop().await;
                        break;
                    }
                }
            }
        }
    }
    mission.join().await;
    println!("phase={}", mission.phase());
    Ok(())
}

async fn drop_payload(cfg: &Config) -> Result<()> {
    let session = connect(cfg).await?;
    let res = session.commander().drop_payload();
    session.stop().await;
    match res? {
        PayloadStep::Release { stage, servo, pwm } => println!("released stage {}/{} (servo {} -> {})", stage, falconer_fc::payload::PAYLOAD_STAGES, servo, pwm),
        PayloadStep::AlreadyComplete => println!("payloads complete; RTL sent"),
    }
    Ok(())
}

async fn emergency_land(cfg: &Config) -> Result<()> {
    let session = connect(cfg).await?;
    let store = session.store();
    info!("{}: emergency land from alt_rel={:.1}m", store.label(), store.snapshot().alt_rel);

    let res = session.commander().smart_emergency_land().await;
    println!("mode={}", store.snapshot().mode);
    session.stop().await;
    res.context("emergency land task")
}

/// Start a session and wait for the first heartbeat.
async fn connect(cfg: &Config) -> Result<Session> {
    let session = Session::new(cfg.fc.clone());
    session.start();
    let store = session.store();

    let wait = cfg.fc.heartbeat_timeout() * 4;
    let connected = tokio::select! {
        ok = tokio::time::timeout(wait, async {
            while !store.snapshot().connected {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }) => ok.is_ok(),
        _ = tokio::signal::ctrl_c() => false,
    };

    if !connected {
        session.stop().await;
        anyhow::bail!("{}: no flight controller link within {:?}", store.label(), wait);
    }
    info!("{}: connected", store.label());
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_c_pause_resume_stop() {
        let seq: Vec<_> = (1..=4).map(on_interrupt).collect();
        assert_eq!(seq, vec![Interrupt::Pause, Interrupt::Resume, Interrupt::Stop, Interrupt::Stop]);
    }

    #[test]
    fn test_config_sections_default() {
        let cfg: Config = toml::from_str(
            r#"
            [fc]
            endpoint = "udpin:0.0.0.0:14550"
            "#,
        )
        .unwrap();
        assert!(cfg.mission.waypoints.is_empty());
        assert!(cfg.intercept.target_class.is_none());
    }

    #[test]
    fn test_doctor_rejects_unknown_target_class() {
        let cfg: Config = toml::from_str(
            r#"
            [fc]
            endpoint = "udpin:0.0.0.0:14550"

            [intercept]
            target_class = "boat"
            class_names = ["person", "car"]
            "#,
        )
        .unwrap();
        assert!(doctor(&cfg).is_err());
    }
}
