pub mod autodetect;
pub mod command;
pub mod decode;
pub mod error;
pub mod failsafe;
pub mod link;
pub mod modes;
pub mod payload;
pub mod safety;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

use serde::Deserialize;
use std::time::Duration;

pub use command::Commander;
pub use error::{CommandError, FcError};
pub use session::Session;
pub use store::TelemetryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// mavlink connection URL (`serial:/dev/ttyACM0:57600`, `udpin:0.0.0.0:14550`,
    /// `tcpout:127.0.0.1:5760`) or a bare serial device path combined with `baud`.
    pub endpoint: Option<String>,
    pub baud: Option<u32>,

    /// Probe candidate serial ports/bauds and pick the first that yields a HEARTBEAT.
    #[serde(default)]
    pub autodetect: bool,
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per connect attempt
    pub heartbeat_timeout_ms: Option<u64>,
    /// Delay between failed connect attempts
    pub reconnect_backoff_ms: Option<u64>,

    /// Session I/O loop rate. Default 10 Hz.
    pub loop_hz: Option<f32>,
    /// No ATTITUDE for this long counts as a stream stall.
    pub stall_timeout_ms: Option<u64>,
    /// Pre-arm check re-trigger period while disarmed.
    pub prearm_poll_ms: Option<u64>,

    /// MAVLink ids we use (ground station side)
    #[serde(default = "default_sys_id")]
    pub sys_id: u8,
    #[serde(default = "default_comp_id")]
    pub comp_id: u8,

    /// 1-based vehicle number, used for log labels (D0, D1, ...)
    #[serde(default = "default_vehicle_id")]
    pub vehicle_id: u8,

    /// Switch to LAND when the estimator reports bad health while armed.
    #[serde(default)]
    pub ekf_failsafe: bool,
}

fn default_sys_id() -> u8 {
    255
}

fn default_comp_id() -> u8 {
    190
}

fn default_vehicle_id() -> u8 {
    1
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            baud: None,
            autodetect: false,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            reconnect_backoff_ms: None,
            loop_hz: None,
            stall_timeout_ms: None,
            prearm_poll_ms: None,
            sys_id: default_sys_id(),
            comp_id: default_comp_id(),
            vehicle_id: default_vehicle_id(),
            ekf_failsafe: false,
        }
    }
}

impl FcConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(3000))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.unwrap_or(2000))
    }

    pub fn loop_period(&self) -> Duration {
        let hz = self.loop_hz.unwrap_or(10.0).clamp(1.0, 50.0);
        Duration::from_secs_f32(1.0 / hz)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms.unwrap_or(2000))
    }

    pub fn prearm_poll(&self) -> Duration {
        Duration::from_millis(self.prearm_poll_ms.unwrap_or(2000))
    }

    /// Resolved connection URL when autodetect is off.
    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint
            .as_deref()
            .map(|ep| link::resolve_endpoint(ep, self.baud.unwrap_or(link::DEFAULT_BAUD)))
    }
}
