//! Background record reaper.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::state::AppState;

/// Purge stale records on a fixed interval, independent of checkin traffic.
pub fn start_reaper(state: Arc<AppState>) {
    let period = state.config.reap_interval;
    tokio::spawn(async move {
        info!("reaper started, every {:?}", period);
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let removed = state.dispatcher.scheduler().reap(Instant::now());
            if removed > 0 {
                debug!(removed, "reaper purged stale records");
            }
            state.check_drained();
        }
    });
}
