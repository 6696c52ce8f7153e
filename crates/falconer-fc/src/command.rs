use mavlink::ardupilotmega::{
    MavAutopilot, MavCmd, MavDataStream, MavFrame, MavMessage, MavModeFlag, MavState, MavType,
    PositionTargetTypemask, COMMAND_INT_DATA, COMMAND_LONG_DATA, HEARTBEAT_DATA,
    MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA, REQUEST_DATA_STREAM_DATA,
    SET_POSITION_TARGET_GLOBAL_INT_DATA, SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::link::FcTransport;
use crate::modes;
use crate::payload::{PayloadSequencer, PayloadStep, PAYLOAD_SERVOS, PWM_REST};
use crate::safety;
use crate::store::TelemetryStore;

/// The session's current transport; `None` while disconnected.
pub type LinkSlot = Arc<RwLock<Option<Arc<dyn FcTransport>>>>;

// Stream ids for SET_MESSAGE_INTERVAL
pub const MSG_HEARTBEAT: u32 = 0;
pub const MSG_SYS_STATUS: u32 = 1;
pub const MSG_GPS_RAW_INT: u32 = 24;
pub const MSG_ATTITUDE: u32 = 30;
pub const MSG_GLOBAL_POSITION_INT: u32 = 33;
pub const MSG_EKF_STATUS_REPORT: u32 = 193;

/// (message id, rate Hz) requested on every (re)connect.
pub const STREAM_RATES: &[(u32, f32)] = &[
    (MSG_GPS_RAW_INT, 1.0),
    (MSG_GLOBAL_POSITION_INT, 2.0),
    (MSG_SYS_STATUS, 1.0),
    (MSG_ATTITUDE, 10.0),
    (MSG_HEARTBEAT, 1.0),
    (MSG_EKF_STATUS_REPORT, 2.0),
];

const LEGACY_STREAM_HZ: u16 = 4;
const ARM_FORCE_MAGIC: f32 = 21196.0;
const MISSION_ITEM_GAP: Duration = Duration::from_millis(50);

/// Velocity-only setpoint: ignore position, acceleration, yaw and yaw rate.
const MASK_VELOCITY_ONLY: u16 = 0b0000_1111_1100_0111;
/// Position-only setpoint.
const MASK_POSITION_ONLY: u16 = 0b0000_1111_1111_1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HomeTarget {
    Current,
    At { lat: f64, lon: f64, alt: f32 },
}

/// Stateless command encoder for one vehicle. Every operation is a single
/// fire-and-forget send; confirmation happens by watching telemetry.
pub struct Commander {
    store: TelemetryStore,
    link: LinkSlot,
    payload: Mutex<PayloadSequencer>,
}

impl Commander {
    pub fn new(store: TelemetryStore, link: LinkSlot) -> Self {
        Self { store, link, payload: Mutex::new(PayloadSequencer::new()) }
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    fn label(&self) -> &str {
        self.store.label()
    }

    fn send(&self, msg: MavMessage) -> Result<(), CommandError> {
        let link = self
            .link
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CommandError::NotConnected)?;
        link.send(&msg)?;
        Ok(())
    }

    fn targets(&self) -> (u8, u8) {
        let s = self.store.snapshot();
        (s.target_system, s.target_component)
    }

    fn command_long(&self, command: MavCmd, p: [f32; 7]) -> Result<(), CommandError> {
        let (target_system, target_component) = self.targets();
        self.send(MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
            command,
            target_system,
            target_component,
            confirmation: 0,
        }))
    }

    /// Ground-station presence heartbeat, sent every session tick.
    pub fn send_heartbeat(&self) -> Result<(), CommandError> {
        self.send(MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }))
    }

    pub fn request_message_interval(&self, msg_id: u32, hz: f32) -> Result<(), CommandError> {
        let interval_us = if hz > 0.0 { 1_000_000.0 / hz } else { -1.0 };
        self.command_long(
            MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL,
            [msg_id as f32, interval_us, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Legacy all-streams request, for firmware that ignores message intervals.
    pub fn request_all_streams(&self) -> Result<(), CommandError> {
        let (target_system, target_component) = self.targets();
        self.send(MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: LEGACY_STREAM_HZ,
            target_system,
            target_component,
            req_stream_id: MavDataStream::MAV_DATA_STREAM_ALL as u8,
            start_stop: 1,
        }))
    }

    pub fn subscribe_streams(&self) -> Result<(), CommandError> {
        for (msg_id, hz) in STREAM_RATES {
            self.request_message_interval(*msg_id, *hz)?;
        }
        self.request_all_streams()
    }

    /// Ask the firmware to re-run its pre-arm checks. Skipped while armed.
    pub fn trigger_prearm_checks(&self) -> Result<(), CommandError> {
        if self.store.snapshot().armed {
            return Ok(());
        }
        self.command_long(MavCmd::MAV_CMD_RUN_PREARM_CHECKS, [0.0; 7])
    }

    pub fn set_mode(&self, mode: &str) -> Result<(), CommandError> {
        let Some(id) = modes::mode_id(mode) else {
            warn!("{}: unknown mode {}", self.label(), mode);
            return Err(CommandError::UnknownMode(mode.to_string()));
        };
        info!("{}: set mode {}", self.label(), mode);
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                id as f32,
                0.0, 0.0, 0.0, 0.0, 0.0,
            ],
        )
    }

    /// Arm through the mode-aware gate; `force` bypasses the gate and the
    /// firmware's own checks.
    pub fn arm(&self, force: bool) -> Result<(), CommandError> {
        if !force {
            if let Err(block) = safety::arm_gate(&self.store.snapshot()) {
                warn!("{}: ABORT ARM: {}", self.label(), block);
                return Err(block.into());
            }
        }
        info!("{}: arm{}", self.label(), if force { " (forced)" } else { "" });
        self.arm_disarm(true, force)
    }

    pub fn disarm(&self, force: bool) -> Result<(), CommandError> {
        info!("{}: disarm{}", self.label(), if force { " (forced)" } else { "" });
        self.arm_disarm(false, force)
    }

    fn arm_disarm(&self, arm: bool, force: bool) -> Result<(), CommandError> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [
                if arm { 1.0 } else { 0.0 },
                if force { ARM_FORCE_MAGIC } else { 0.0 },
                0.0, 0.0, 0.0, 0.0, 0.0,
            ],
        )
    }

    /// Takeoff to `alt` metres above home at the current position.
    pub fn takeoff(&self, alt: f32) -> Result<(), CommandError> {
        let s = self.store.snapshot();
        info!("{}: takeoff to {:.1} m", self.label(), alt);
        self.send(MavMessage::COMMAND_INT(COMMAND_INT_DATA {
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: to_e7(s.lat),
            y: to_e7(s.lon),
            z: alt,
            command: MavCmd::MAV_CMD_NAV_TAKEOFF,
            target_system: s.target_system,
            target_component: s.target_component,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            current: 0,
            autocontinue: 0,
        }))
    }

    /// NED body-less velocity setpoint in m/s (z positive down).
    pub fn send_velocity(&self, vx: f32, vy: f32, vz: f32) -> Result<(), CommandError> {
        let (target_system, target_component) = self.targets();
        debug!("{}: velocity {:.2} {:.2} {:.2}", self.label(), vx, vy, vz);
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: 0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx,
            vy,
            vz,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(MASK_VELOCITY_ONLY),
            target_system,
            target_component,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
        }))
    }

    /// Position setpoint at `alt` metres relative to home.
    pub fn goto(&self, lat: f64, lon: f64, alt: f32) -> Result<(), CommandError> {
        let (target_system, target_component) = self.targets();
        debug!("{}: goto {:.7} {:.7} @ {:.1}", self.label(), lat, lon, alt);
        self.send(MavMessage::SET_POSITION_TARGET_GLOBAL_INT(SET_POSITION_TARGET_GLOBAL_INT_DATA {
            time_boot_ms: 0,
            lat_int: to_e7(lat),
            lon_int: to_e7(lon),
            alt,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(MASK_POSITION_ONLY),
            target_system,
            target_component,
            coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        }))
    }

    /// Hold the current horizontal position at a new altitude.
    pub fn set_target_altitude(&self, alt: f32) -> Result<(), CommandError> {
        let s = self.store.snapshot();
        if !s.has_position() {
            return Err(CommandError::NoPosition);
        }
        info!("{}: target altitude {:.1} m", self.label(), alt);
        self.goto(s.lat, s.lon, alt)
    }

    /// Ground speed in m/s; throttle unchanged.
    pub fn set_speed(&self, speed: f32) -> Result<(), CommandError> {
        info!("{}: speed {:.1} m/s", self.label(), speed);
        self.command_long(MavCmd::MAV_CMD_DO_CHANGE_SPEED, [1.0, speed, -1.0, 0.0, 0.0, 0.0, 0.0])
    }

    /// Set the firmware's home and the locally latched home together.
    pub fn set_home(&self, target: HomeTarget) -> Result<(), CommandError> {
        match target {
            HomeTarget::Current => {
                let s = self.store.snapshot();
                if !s.has_position() {
                    return Err(CommandError::NoPosition);
                }
                self.command_long(MavCmd::MAV_CMD_DO_SET_HOME, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])?;
                self.store.override_home(s.lat, s.lon);
            }
            HomeTarget::At { lat, lon, alt } => {
                self.command_long(
                    MavCmd::MAV_CMD_DO_SET_HOME,
                    [0.0, 0.0, 0.0, 0.0, lat as f32, lon as f32, alt],
                )?;
                self.store.override_home(lat, lon);
            }
        }
        Ok(())
    }

    pub fn set_servo(&self, servo: u8, pwm: u16) -> Result<(), CommandError> {
        debug!("{}: servo {} -> {}", self.label(), servo, pwm);
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_SERVO,
            [servo as f32, pwm as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Fire the next payload stage. The last stage sends the vehicle home and
    /// parks every actuator; later calls only repeat the RTL.
    pub fn drop_payload(&self) -> Result<PayloadStep, CommandError> {
        let step = self.payload.lock().unwrap_or_else(|e| e.into_inner()).advance();
        match step {
            PayloadStep::AlreadyComplete => {
                info!("{}: all payloads released, RTL", self.label());
                self.set_mode(modes::RTL)?;
            }
            PayloadStep::Release { stage, servo, pwm } => {
                info!("{}: payload {}/{} servo {} pwm {}", self.label(), stage, crate::payload::PAYLOAD_STAGES, servo, pwm);
                self.set_servo(servo, pwm)?;
                if step.completes() {
                    info!("{}: payload sequence complete, RTL", self.label());
                    self.set_mode(modes::RTL)?;
                    self.park_payloads()?;
                }
            }
        }
        Ok(step)
    }

    /// Park every payload actuator and re-arm the sequence for the next flight.
    pub fn reset_payloads(&self) -> Result<(), CommandError> {
        self.payload.lock().unwrap_or_else(|e| e.into_inner()).reset();
        self.park_payloads()
    }

    fn park_payloads(&self) -> Result<(), CommandError> {
        for servo in PAYLOAD_SERVOS {
            self.set_servo(servo, PWM_REST)?;
        }
        Ok(())
    }

    pub fn payload_index(&self) -> u8 {
        self.payload.lock().unwrap_or_else(|e| e.into_inner()).index()
    }

    /// Replace the firmware mission: takeoff here, each waypoint, land at the last.
    /// Returns the number of items sent.
    pub async fn upload_mission(&self, waypoints: &[(f64, f64)], alt: f32) -> Result<usize, CommandError> {
        let Some(&(last_lat, last_lon)) = waypoints.last() else {
            return Err(CommandError::EmptyMission);
        };
        let s = self.store.snapshot();
        if !s.has_position() {
            return Err(CommandError::NoPosition);
        }
        let (target_system, target_component) = (s.target_system, s.target_component);
        let count = waypoints.len() + 2;
        info!("{}: uploading mission, {} items", self.label(), count);

        self.send(MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system,
            target_component,
            ..Default::default()
        }))?;
        self.send(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count: count as u16,
            target_system,
            target_component,
            ..Default::default()
        }))?;

        let item = |seq: usize, command: MavCmd, lat: f64, lon: f64, z: f32| {
            MavMessage::MISSION_ITEM_INT(MISSION_ITEM_INT_DATA {
                x: to_e7(lat),
                y: to_e7(lon),
                z,
                seq: seq as u16,
                command,
                target_system,
                target_component,
                frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
                current: 0,
                autocontinue: 1,
                ..Default::default()
            })
        };

        self.send(item(0, MavCmd::MAV_CMD_NAV_TAKEOFF, s.lat, s.lon, alt))?;
        tokio::time::sleep(MISSION_ITEM_GAP).await;
        for (i, (lat, lon)) in waypoints.iter().enumerate() {
            self.send(item(i + 1, MavCmd::MAV_CMD_NAV_WAYPOINT, *lat, *lon, alt))?;
            tokio::time::sleep(MISSION_ITEM_GAP).await;
        }
        self.send(item(count - 1, MavCmd::MAV_CMD_NAV_LAND, last_lat, last_lon, 0.0))?;
        Ok(count)
    }

    /// Stop, hop up to clear obstacles, then land. Runs in the background.
    pub fn smart_emergency_land(self: &Arc<Self>) -> JoinHandle<()> {
        let cmd = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cmd.emergency_land_sequence().await {
                warn!("{}: emergency land failed: {}", cmd.label(), e);
            }
        })
    }

    async fn emergency_land_sequence(&self) -> Result<(), CommandError> {
        warn!("{}: smart emergency land", self.label());
        self.set_mode(modes::GUIDED)?;
        self.send_velocity(0.0, 0.0, 0.0)?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.command_long(MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 4.0])?;
        tokio::time::sleep(Duration::from_secs(4)).await;
        self.send_velocity(0.0, 0.0, 0.0)?;
        tokio::time::sleep(Duration::from_secs(3)).await;
        self.set_mode(modes::LAND)
    }
}

fn to_e7(deg: f64) -> i32 {
    (deg * 1e7).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockTransport};
    use crate::safety::ArmBlock;

    fn setup() -> (Arc<MockTransport>, Arc<Commander>) {
        let transport = Arc::new(MockTransport::new());
        let cmd = mock::commander(transport.clone(), 1);
        (transport, cmd)
    }

    #[test]
    fn test_not_connected() {
        let store = TelemetryStore::new(1);
        let cmd = Commander::new(store, Arc::new(RwLock::new(None)));
        assert!(matches!(cmd.send_heartbeat(), Err(CommandError::NotConnected)));
    }

    #[test]
    fn test_set_mode_encodes_custom_mode() {
        let (t, cmd) = setup();
        cmd.set_mode("GUIDED").unwrap();
        assert_eq!(mock::mode_requests(&t.sent()), vec!["GUIDED".to_string()]);
        assert!(matches!(cmd.set_mode("WARP"), Err(CommandError::UnknownMode(_))));
        assert_eq!(t.sent().len(), 1);
    }

    #[test]
    fn test_arm_gate_blocks_without_sending() {
        let (t, cmd) = setup();
        cmd.store().ingest(&mock::heartbeat("GUIDED", false));
        cmd.store().ingest(&mock::gps_raw(3, 10, 0.8));
        let err = cmd.arm(false).unwrap_err();
        assert!(matches!(err, CommandError::ArmBlocked(ArmBlock::NotReady(_))));
        assert!(t.sent().is_empty());

        cmd.store().ingest(&mock::status_text("Ready to fly"));
        cmd.arm(false).unwrap();
        let arms = mock::commands(&t.sent(), MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].param1, 1.0);
        assert_eq!(arms[0].param2, 0.0);
    }

    #[test]
    fn test_force_arm_bypasses_gate() {
        let (t, cmd) = setup();
        cmd.store().ingest(&mock::status_text("PreArm: Throttle too high"));
        cmd.arm(true).unwrap();
        let arms = mock::commands(&t.sent(), MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
        assert_eq!(arms[0].param2, 21196.0);
    }

    #[test]
    fn test_velocity_mask_and_frame() {
        let (t, cmd) = setup();
        cmd.send_velocity(0.0, 0.5, -0.2).unwrap();
        match &t.sent()[0] {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(v) => {
                assert_eq!(v.type_mask.bits(), 0b0000_1111_1100_0111);
                assert_eq!(v.coordinate_frame, MavFrame::MAV_FRAME_LOCAL_NED);
                assert_eq!((v.vx, v.vy, v.vz), (0.0, 0.5, -0.2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_goto_encodes_e7() {
        let (t, cmd) = setup();
        cmd.goto(47.3977419, 8.5455938, 10.0).unwrap();
        assert_eq!(mock::position_targets(&t.sent()), vec![(473977419, 85455938, 10.0)]);
    }

    #[test]
    fn test_prearm_skipped_when_armed() {
        let (t, cmd) = setup();
        cmd.trigger_prearm_checks().unwrap();
        assert_eq!(mock::commands(&t.sent(), MavCmd::MAV_CMD_RUN_PREARM_CHECKS).len(), 1);
        cmd.store().ingest(&mock::heartbeat("LOITER", true));
        cmd.trigger_prearm_checks().unwrap();
        assert_eq!(mock::commands(&t.sent(), MavCmd::MAV_CMD_RUN_PREARM_CHECKS).len(), 1);
    }

    #[test]
    fn test_subscribe_requests_every_stream() {
        let (t, cmd) = setup();
        cmd.subscribe_streams().unwrap();
        let sent = t.sent();
        let intervals = mock::commands(&sent, MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL);
        let ids: Vec<u32> = intervals.iter().map(|c| c.param1 as u32).collect();
        assert_eq!(ids, vec![24, 33, 1, 30, 0, 193]);
        assert_eq!(intervals[3].param2, 100_000.0);
        assert!(sent.iter().any(|m| matches!(m, MavMessage::REQUEST_DATA_STREAM(_))));
    }

    #[test]
    fn test_payload_sequence_then_rtl() {
        let (t, cmd) = setup();
        for _ in 0..7 {
            cmd.drop_payload().unwrap();
        }
        assert!(mock::mode_requests(&t.sent()).is_empty());

        let last = cmd.drop_payload().unwrap();
        assert!(last.completes());
        let sent = t.sent();
        assert_eq!(mock::mode_requests(&sent), vec!["RTL".to_string()]);
        let servos: Vec<(u8, u16)> = mock::commands(&sent, MavCmd::MAV_CMD_DO_SET_SERVO)
            .iter()
            .map(|c| (c.param1 as u8, c.param2 as u16))
            .collect();
        assert_eq!(&servos[..8], &[(5, 1500), (5, 2000), (6, 1500), (6, 2000), (7, 1500), (7, 2000), (8, 1500), (8, 2000)]);
        assert_eq!(&servos[8..], &[(5, 1000), (6, 1000), (7, 1000), (8, 1000)]);

        t.clear_sent();
        assert_eq!(cmd.drop_payload().unwrap(), PayloadStep::AlreadyComplete);
        let sent = t.sent();
        assert_eq!(mock::mode_requests(&sent), vec!["RTL".to_string()]);
        assert!(mock::commands(&sent, MavCmd::MAV_CMD_DO_SET_SERVO).is_empty());
    }

    #[test]
    fn test_set_home_overrides_local_home() {
        let (t, cmd) = setup();
        assert!(matches!(cmd.set_home(HomeTarget::Current), Err(CommandError::NoPosition)));
        cmd.set_home(HomeTarget::At { lat: 47.0, lon: 8.0, alt: 400.0 }).unwrap();
        assert_eq!(cmd.store().snapshot().home.map(|h| (h.lat, h.lon)), Some((47.0, 8.0)));
        let sets = mock::commands(&t.sent(), MavCmd::MAV_CMD_DO_SET_HOME);
        assert_eq!(sets[0].param1, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_mission_layout() {
        let (t, cmd) = setup();
        assert!(matches!(cmd.upload_mission(&[], 10.0).await, Err(CommandError::EmptyMission)));

        cmd.store().ingest(&mock::gps_raw(3, 10, 0.8));
        cmd.store().ingest(&mock::global_position(47.0, 8.0, 0.0));
        let n = cmd.upload_mission(&[(47.001, 8.0), (47.002, 8.001)], 15.0).await.unwrap();
        assert_eq!(n, 4);

        let sent = t.sent();
        assert!(matches!(sent[0], MavMessage::MISSION_CLEAR_ALL(_)));
        match &sent[1] {
            MavMessage::MISSION_COUNT(c) => assert_eq!(c.count, 4),
            other => panic!("unexpected {:?}", other),
        }
        let items: Vec<&MISSION_ITEM_INT_DATA> = sent
            .iter()
            .filter_map(|m| match m {
                MavMessage::MISSION_ITEM_INT(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].command, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(items[0].x, 470000000);
        assert_eq!(items[2].command, MavCmd::MAV_CMD_NAV_WAYPOINT);
        assert_eq!(items[3].command, MavCmd::MAV_CMD_NAV_LAND);
        assert_eq!(items[3].seq, 3);
        assert_eq!((items[3].x, items[3].y), (470020000, 80010000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_land_sequence() {
        let (t, cmd) = setup();
        cmd.smart_emergency_land().await.unwrap();
        let sent = t.sent();
        assert_eq!(mock::mode_requests(&sent), vec!["GUIDED".to_string(), "LAND".to_string()]);
        let hop = mock::commands(&sent, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(hop[0].param7, 4.0);
        assert_eq!(mock::velocities(&sent).len(), 2);
    }
}
