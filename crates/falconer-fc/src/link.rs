use anyhow::{Context, Result};
use mavlink::{
    ardupilotmega::{MavMessage, MavType},
    error::MessageReadError,
    MavConnection, MavHeader,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::FcError;

pub const DEFAULT_BAUD: u32 = 57600;

const URL_SCHEMES: &[&str] = &[
    "serial:", "udpin:", "udpout:", "udpbcast:", "tcpin:", "tcpout:", "file:",
];

pub type Inbound = (MavHeader, MavMessage);

/// Opens a transport for a resolved endpoint URL.
pub type LinkOpener = Arc<dyn Fn(&str, u8, u8) -> Result<Arc<dyn FcTransport>> + Send + Sync>;

/// Byte-level MAVLink transport to the flight controller.
///
/// `recv` may block; it returns `Ok(None)` for transient conditions (bad CRC,
/// read timeout) and `Err` only when the transport is gone.
pub trait FcTransport: Send + Sync {
    fn send(&self, msg: &MavMessage) -> Result<()>;
    fn recv(&self) -> Result<Option<Inbound>>;
}

pub struct MavLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    hdr: Mutex<MavHeader>,
}

impl MavLink {
    pub fn open(url: &str, sys_id: u8, comp_id: u8) -> Result<Self> {
        if let Some((dev, baud)) = serial_parts(url) {
            // quick validate device
            let _ = tokio_serial::new(dev, baud)
                .open()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;

        Ok(Self {
            conn,
            hdr: Mutex::new(MavHeader { system_id: sys_id, component_id: comp_id, sequence: 0 }),
        })
    }

    pub fn opener() -> LinkOpener {
        Arc::new(|url: &str, sys_id: u8, comp_id: u8| {
            let link: Arc<dyn FcTransport> = Arc::new(MavLink::open(url, sys_id, comp_id)?);
            Ok(link)
        })
    }
}

impl FcTransport for MavLink {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        let hdr = {
            let mut hdr = self.hdr.lock().unwrap_or_else(|e| e.into_inner());
            hdr.sequence = hdr.sequence.wrapping_add(1);
            *hdr
        };
        self.conn.send(&hdr, msg).context("mavlink send")?;
        Ok(())
    }

    fn recv(&self) -> Result<Option<Inbound>> {
        match self.conn.recv() {
            Ok(inbound) => Ok(Some(inbound)),
            Err(MessageReadError::Io(e))
                if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(MessageReadError::Io(e)) => Err(anyhow::Error::new(e).context("mavlink recv")),
            Err(e) => {
                debug!("mavlink recv: dropping frame: {:?}", e);
                Ok(None)
            }
        }
    }
}

/// `serial:<dev>:<baud>` -> (dev, baud)
pub fn serial_parts(url: &str) -> Option<(&str, u32)> {
    let rest = url.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    Some((dev, baud.parse().ok()?))
}

/// Bare device paths become `serial:<dev>:<baud>`; URLs pass through.
pub fn resolve_endpoint(endpoint: &str, baud: u32) -> String {
    if URL_SCHEMES.iter().any(|s| endpoint.starts_with(s)) {
        endpoint.to_string()
    } else {
        format!("serial:{}:{}", endpoint, baud)
    }
}

/// Pumps inbound messages from a blocking transport into a channel on a
/// dedicated thread. The thread exits when the receiver is dropped or the
/// transport fails; the channel closing is the disconnect signal.
pub fn spawn_reader(link: Arc<dyn FcTransport>, label: &str) -> Result<mpsc::Receiver<Inbound>> {
    let (tx, rx) = mpsc::channel(256);
    let label = label.to_string();
    std::thread::Builder::new()
        .name(format!("fc-rx-{}", label))
        .spawn(move || {
            while !tx.is_closed() {
                match link.recv() {
                    Ok(Some(inbound)) => {
                        if tx.blocking_send(inbound).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("{}: link read failed: {:#}", label, e);
                        break;
                    }
                }
            }
            debug!("{}: link reader exit", label);
        })
        .context("spawn link reader")?;
    Ok(rx)
}

/// Waits for the first vehicle heartbeat; ground station heartbeats are skipped.
pub async fn wait_heartbeat(rx: &mut mpsc::Receiver<Inbound>, timeout: Duration) -> Option<Inbound> {
    let wait = async {
        while let Some((hdr, msg)) = rx.recv().await {
            if let MavMessage::HEARTBEAT(hb) = &msg {
                if hb.mavtype != MavType::MAV_TYPE_GCS {
                    return Some((hdr, msg));
                }
            }
        }
        None
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}

/// An open transport that has produced a heartbeat.
pub struct Connection {
    pub endpoint: String,
    pub link: Arc<dyn FcTransport>,
    pub rx: mpsc::Receiver<Inbound>,
    pub target_system: u8,
    pub target_component: u8,
    /// The heartbeat that identified the vehicle.
    pub heartbeat: MavMessage,
}

/// Open `endpoint` and wait for the first vehicle heartbeat.
pub async fn connect(
    opener: &LinkOpener,
    endpoint: &str,
    sys_id: u8,
    comp_id: u8,
    timeout: Duration,
    label: &str,
) -> Result<Connection, FcError> {
    let open = opener.clone();
    let url = endpoint.to_string();
    let link = tokio::task::spawn_blocking(move || open(&url, sys_id, comp_id))
        .await
        .map_err(anyhow::Error::new)
        .and_then(|r| r)
        .map_err(|source| FcError::Open { endpoint: endpoint.to_string(), source })?;

    let mut rx = spawn_reader(link.clone(), label)
        .map_err(|source| FcError::Open { endpoint: endpoint.to_string(), source })?;

    match wait_heartbeat(&mut rx, timeout).await {
        Some((hdr, heartbeat)) => {
            info!("{}: heartbeat from system {} on {}", label, hdr.system_id, endpoint);
            Ok(Connection {
                endpoint: endpoint.to_string(),
                link,
                rx,
                target_system: hdr.system_id,
                target_component: hdr.component_id,
                heartbeat,
            })
        }
        None => Err(FcError::ConnectionTimeout { endpoint: endpoint.to_string(), timeout }),
    }
}
