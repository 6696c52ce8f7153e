use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::FcError;
use crate::link::{self, Connection, LinkOpener};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
    /// Live connection to the chosen port, already past its first heartbeat.
    pub connection: Option<Connection>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Try each device at each baud rate; stop at the first vehicle heartbeat.
pub async fn autodetect_fc(
    opener: &LinkOpener,
    candidate_devs: &[String],
    candidate_bauds: &[u32],
    heartbeat_timeout: Duration,
    sys_id: u8,
    comp_id: u8,
    label: &str,
) -> AutodetectResult {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for baud in candidate_bauds {
            let start = Instant::now();
            let url = format!("serial:{}:{}", dev, baud);

            let note = match link::connect(opener, &url, sys_id, comp_id, heartbeat_timeout, label).await {
                Ok(conn) => {
                    probes.push(ProbeResult {
                        dev: dev.clone(),
                        baud: *baud,
                        hb_seen: true,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        note: "heartbeat".into(),
                    });
                    info!("fc autodetect: OK {} @ {}", dev, baud);
                    return AutodetectResult {
                        chosen: Some((dev.clone(), *baud)),
                        probes,
                        connection: Some(conn),
                    };
                }
                Err(FcError::ConnectionTimeout { .. }) => "no heartbeat".to_string(),
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={}", dev, baud, e);
                    format!("open/connect failed: {}", e)
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen: false,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
        }
    }

    AutodetectResult { chosen: None, probes, connection: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockTransport};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_picks_first_port_with_heartbeat() {
        let silent = Arc::new(MockTransport::new());
        let live = Arc::new(MockTransport::new());
        live.push_inbound(1, mock::heartbeat("STABILIZE", false));

        let opener: LinkOpener = Arc::new(move |url: &str, _: u8, _: u8| {
            if url.starts_with("serial:/dev/ttyACM0:") {
                let link: Arc<dyn link::FcTransport> = live.clone();
                Ok(link)
            } else if url.starts_with("serial:/dev/ttyUSB0:") {
                let link: Arc<dyn link::FcTransport> = silent.clone();
                Ok(link)
            } else {
                Err(anyhow::anyhow!("no such device"))
            }
        });

        let devs = vec!["/dev/ttyS9".to_string(), "/dev/ttyUSB0".into(), "/dev/ttyACM0".into()];
        let res = autodetect_fc(&opener, &devs, &[57600], Duration::from_millis(150), 255, 190, "D0").await;

        assert_eq!(res.chosen, Some(("/dev/ttyACM0".to_string(), 57600)));
        assert_eq!(res.probes.len(), 3);
        assert!(res.probes[0].note.starts_with("open/connect failed"));
        assert_eq!(res.probes[1].note, "no heartbeat");
        assert!(res.probes[2].hb_seen);
        assert_eq!(res.connection.map(|c| c.target_system), Some(1));
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let opener: LinkOpener = Arc::new(|_: &str, _: u8, _: u8| Err(anyhow::anyhow!("no such device")));
        let res = autodetect_fc(&opener, &default_candidate_devs(), &[57600, 115200], Duration::from_millis(10), 255, 190, "D0").await;
        assert!(res.chosen.is_none());
        assert_eq!(res.probes.len(), 14);
    }
}
