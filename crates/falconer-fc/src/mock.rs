//! In-process transports for tests: a scripted link and a tiny simulated vehicle.

use anyhow::{anyhow, Result};
use mavlink::ardupilotmega::{
    EkfStatusFlags, GpsFixType, MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavSeverity,
    MavState, MavType, ATTITUDE_DATA, COMMAND_LONG_DATA, EKF_STATUS_REPORT_DATA,
    GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, STATUSTEXT_DATA, SYS_STATUS_DATA,
};
use mavlink::MavHeader;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::command::Commander;
use crate::link::{FcTransport, Inbound, LinkOpener};
use crate::modes;
use crate::store::TelemetryStore;

const IDLE_POLL: Duration = Duration::from_millis(5);

/// Records everything sent; replays queued inbound messages.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<MavMessage>>,
    inbound: Mutex<VecDeque<Inbound>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, system_id: u8, msg: MavMessage) {
        let hdr = MavHeader { system_id, component_id: 1, sequence: 0 };
        self.inbound.lock().unwrap().push_back((hdr, msg));
    }

    pub fn sent(&self) -> Vec<MavMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Make the next `recv` fail, as a dropped serial port would.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl FcTransport for MockTransport {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("mock link closed"));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    fn recv(&self) -> Result<Option<Inbound>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("mock link closed"));
        }
        let next = self.inbound.lock().unwrap().pop_front();
        if next.is_none() {
            std::thread::sleep(IDLE_POLL);
        }
        Ok(next)
    }
}

/// Kinematic state of a [`SimVehicle`] plus knobs for misbehaviour.
#[derive(Debug, Clone)]
pub struct SimModel {
    pub mode: String,
    pub armed: bool,
    pub lat: f64,
    pub lon: f64,
    pub alt: f32,
    /// Mode changes take effect.
    pub obeys_mode: bool,
    /// Arm commands take effect.
    pub arms: bool,
    /// Position setpoints teleport the vehicle to the target.
    pub moves: bool,
}

/// Loopback vehicle: every command immediately shows up in the store as if
/// the autopilot had executed it and reported back.
pub struct SimVehicle {
    store: TelemetryStore,
    sent: Mutex<Vec<MavMessage>>,
    model: Mutex<SimModel>,
}

impl SimVehicle {
    /// Disarmed in STABILIZE on the ground at (lat, lon) with a 3D fix and
    /// "Ready to fly".
    pub fn new(store: TelemetryStore, lat: f64, lon: f64) -> Arc<Self> {
        let sim = Arc::new(Self {
            store,
            sent: Mutex::new(Vec::new()),
            model: Mutex::new(SimModel {
                mode: "STABILIZE".into(),
                armed: false,
                lat,
                lon,
                alt: 0.0,
                obeys_mode: true,
                arms: true,
                moves: true,
            }),
        });
        sim.store.ingest(&gps_raw(3, 12, 0.8));
        sim.store.ingest(&status_text("Ready to fly"));
        sim.publish();
        sim
    }

    pub fn configure(&self, f: impl FnOnce(&mut SimModel)) {
        f(&mut self.model.lock().unwrap());
        self.publish();
    }

    pub fn model(&self) -> SimModel {
        self.model.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<MavMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Push the model into the store as HEARTBEAT + GLOBAL_POSITION_INT.
    pub fn publish(&self) {
        let m = self.model();
        self.store.ingest(&heartbeat(&m.mode, m.armed));
        self.store.ingest(&global_position(m.lat, m.lon, m.alt));
    }

    fn react(&self, msg: &MavMessage) {
        {
            let mut m = self.model.lock().unwrap();
            match msg {
                MavMessage::COMMAND_LONG(c) if c.command == MavCmd::MAV_CMD_DO_SET_MODE => {
                    if m.obeys_mode {
                        m.mode = modes::mode_name(c.param2 as u32);
                    }
                }
                MavMessage::COMMAND_LONG(c) if c.command == MavCmd::MAV_CMD_COMPONENT_ARM_DISARM => {
                    if m.arms || c.param1 == 0.0 {
                        m.armed = c.param1 == 1.0;
                    }
                }
                MavMessage::COMMAND_INT(c) if c.command == MavCmd::MAV_CMD_NAV_TAKEOFF => {
                    if m.armed {
                        m.alt = c.z;
                    }
                }
                MavMessage::SET_POSITION_TARGET_GLOBAL_INT(p) => {
                    if m.moves {
                        m.lat = p.lat_int as f64 / 1e7;
                        m.lon = p.lon_int as f64 / 1e7;
                        m.alt = p.alt;
                    }
                }
                _ => return,
            }
        }
        self.publish();
    }
}

impl FcTransport for SimVehicle {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        self.react(msg);
        Ok(())
    }

    fn recv(&self) -> Result<Option<Inbound>> {
        std::thread::sleep(IDLE_POLL);
        Ok(None)
    }
}

pub fn opener(transport: Arc<MockTransport>) -> LinkOpener {
    Arc::new(move |_url: &str, _sys: u8, _comp: u8| {
        let link: Arc<dyn FcTransport> = transport.clone();
        Ok(link)
    })
}

/// Store that looks connected to system 1.
pub fn connected_store(vehicle_id: u8) -> TelemetryStore {
    let store = TelemetryStore::new(vehicle_id);
    store.set_link(true, 1, 1);
    store
}

pub fn commander(transport: Arc<dyn FcTransport>, vehicle_id: u8) -> Arc<Commander> {
    commander_for(connected_store(vehicle_id), transport)
}

pub fn commander_for(store: TelemetryStore, transport: Arc<dyn FcTransport>) -> Arc<Commander> {
    Arc::new(Commander::new(store, Arc::new(RwLock::new(Some(transport)))))
}

/// A commander wired to a fresh [`SimVehicle`] parked at (lat, lon).
pub fn sim(vehicle_id: u8, lat: f64, lon: f64) -> (Arc<SimVehicle>, Arc<Commander>) {
    let store = connected_store(vehicle_id);
    let sim = SimVehicle::new(store.clone(), lat, lon);
    let cmd = commander_for(store, sim.clone());
    (sim, cmd)
}

// --- message builders ---

pub fn heartbeat(mode: &str, armed: bool) -> MavMessage {
    let mut base_mode = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
    if armed {
        base_mode |= MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED;
    }
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: modes::mode_id(mode).unwrap_or(0),
        mavtype: MavType::MAV_TYPE_QUADROTOR,
        autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
        base_mode,
        system_status: if armed { MavState::MAV_STATE_ACTIVE } else { MavState::MAV_STATE_STANDBY },
        mavlink_version: 3,
    })
}

pub fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

pub fn gps_raw(fix: u8, sats: u8, hdop: f32) -> MavMessage {
    let fix_type = match fix {
        0 => GpsFixType::GPS_FIX_TYPE_NO_GPS,
        1 => GpsFixType::GPS_FIX_TYPE_NO_FIX,
        2 => GpsFixType::GPS_FIX_TYPE_2D_FIX,
        3 => GpsFixType::GPS_FIX_TYPE_3D_FIX,
        4 => GpsFixType::GPS_FIX_TYPE_DGPS,
        5 => GpsFixType::GPS_FIX_TYPE_RTK_FLOAT,
        _ => GpsFixType::GPS_FIX_TYPE_RTK_FIXED,
    };
    MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
        fix_type,
        satellites_visible: sats,
        eph: (hdop * 100.0).round() as u16,
        ..Default::default()
    })
}

pub fn global_position(lat: f64, lon: f64, alt_rel: f32) -> MavMessage {
    global_position_vel(lat, lon, alt_rel, 0, 0, 0)
}

/// Velocities in cm/s, NED.
pub fn global_position_vel(lat: f64, lon: f64, alt_rel: f32, vx: i16, vy: i16, vz: i16) -> MavMessage {
    MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
        time_boot_ms: 0,
        lat: (lat * 1e7).round() as i32,
        lon: (lon * 1e7).round() as i32,
        alt: (alt_rel * 1000.0) as i32,
        relative_alt: (alt_rel * 1000.0) as i32,
        vx,
        vy,
        vz,
        hdg: 0,
    })
}

pub fn attitude(roll: f32, pitch: f32, yaw: f32) -> MavMessage {
    MavMessage::ATTITUDE(ATTITUDE_DATA {
        time_boot_ms: 0,
        roll,
        pitch,
        yaw,
        rollspeed: 0.0,
        pitchspeed: 0.0,
        yawspeed: 0.0,
    })
}

pub fn status_text(text: &str) -> MavMessage {
    let mut raw = [0u8; 50];
    let n = text.len().min(raw.len());
    raw[..n].copy_from_slice(&text.as_bytes()[..n]);
    MavMessage::STATUSTEXT(STATUSTEXT_DATA {
        severity: MavSeverity::MAV_SEVERITY_INFO,
        text: raw,
        ..Default::default()
    })
}

pub fn sys_status(voltage_mv: u16) -> MavMessage {
    MavMessage::SYS_STATUS(SYS_STATUS_DATA {
        voltage_battery: voltage_mv,
        ..Default::default()
    })
}

pub fn ekf_report(velocity: f32, pos_horiz: f32, pos_vert: f32, compass: f32) -> MavMessage {
    MavMessage::EKF_STATUS_REPORT(EKF_STATUS_REPORT_DATA {
        velocity_variance: velocity,
        pos_horiz_variance: pos_horiz,
        pos_vert_variance: pos_vert,
        compass_variance: compass,
        flags: EkfStatusFlags::EKF_ATTITUDE | EkfStatusFlags::EKF_VELOCITY_HORIZ,
        ..Default::default()
    })
}

// --- outbound decoders for assertions ---

pub fn commands(sent: &[MavMessage], command: MavCmd) -> Vec<COMMAND_LONG_DATA> {
    sent.iter()
        .filter_map(|m| match m {
            MavMessage::COMMAND_LONG(c) if c.command == command => Some(c.clone()),
            _ => None,
        })
        .collect()
}

/// Requested modes, in order.
pub fn mode_requests(sent: &[MavMessage]) -> Vec<String> {
    commands(sent, MavCmd::MAV_CMD_DO_SET_MODE)
        .iter()
        .map(|c| modes::mode_name(c.param2 as u32))
        .collect()
}

pub fn velocities(sent: &[MavMessage]) -> Vec<(f32, f32, f32)> {
    sent.iter()
        .filter_map(|m| match m {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(v) => Some((v.vx, v.vy, v.vz)),
            _ => None,
        })
        .collect()
}

/// (lat e7, lon e7, alt) of every global position setpoint.
pub fn position_targets(sent: &[MavMessage]) -> Vec<(i32, i32, f32)> {
    sent.iter()
        .filter_map(|m| match m {
            MavMessage::SET_POSITION_TARGET_GLOBAL_INT(p) => Some((p.lat_int, p.lon_int, p.alt)),
            _ => None,
        })
        .collect()
}
