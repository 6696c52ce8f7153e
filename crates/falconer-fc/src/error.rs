use std::time::Duration;
use thiserror::Error;

use crate::safety::ArmBlock;

#[derive(Debug, Error)]
pub enum FcError {
    #[error("no heartbeat from {endpoint} within {timeout:?}")]
    ConnectionTimeout { endpoint: String, timeout: Duration },

    #[error("link reader for {0} stopped")]
    LinkClosed(String),

    #[error("no flight controller endpoint configured")]
    NoEndpoint,

    #[error("autodetect found no flight controller ({probes} probes)")]
    NotFound { probes: usize },

    #[error("open {endpoint}: {source:#}")]
    Open {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no flight controller link")]
    NotConnected,

    #[error("unknown flight mode {0:?}")]
    UnknownMode(String),

    #[error("arming blocked: {0}")]
    ArmBlocked(#[from] ArmBlock),

    #[error("no valid position fix")]
    NoPosition,

    #[error("nothing to upload")]
    EmptyMission,

    #[error(transparent)]
    Link(#[from] anyhow::Error),
}
