use falconer_proto::telemetry::{EkfHealth, VehicleState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::Commander;
use crate::modes;
use crate::safety::RateLimit;
use crate::session::wait_shutdown;

pub const CHECK_PERIOD: Duration = Duration::from_millis(500);
pub const REPEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Armed, estimator unusable, not already landing.
pub fn should_land(state: &VehicleState) -> bool {
    state.armed && state.mode != modes::LAND && state.ekf.health() == EkfHealth::Bad
}

/// Watches estimator health and forces LAND when it goes bad in flight.
pub async fn run(commander: Arc<Commander>, mut shutdown: watch::Receiver<bool>) {
    let label = commander.store().label().to_string();
    let mut limiter = RateLimit::new(REPEAT_INTERVAL);
    let mut tick = tokio::time::interval(CHECK_PERIOD);
    loop {
        tokio::select! {
            _ = wait_shutdown(&mut shutdown) => break,
            _ = tick.tick() => {}
        }
        let state = commander.store().snapshot();
        if should_land(&state) && limiter.allow() {
            warn!(
                "{}: EKF failsafe, variance {:.2}, switching to LAND",
                label,
                state.ekf.max_variance()
            );
            if let Err(e) = commander.set_mode(modes::LAND) {
                warn!("{}: EKF failsafe LAND failed: {}", label, e);
            }
        }
    }
    debug!("{}: failsafe exit", label);
}
