//! Shared application state.

use multimpi_broker::{Dispatcher, Scheduler};
use multimpi_core::BrokerConfig;
use tokio::sync::Notify;
use tracing::info;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: BrokerConfig,
    pub dispatcher: Dispatcher,
    /// Fires once draining has emptied both registries.
    pub drained: Notify,
}

impl AppState {
    pub fn new(config: BrokerConfig) -> Self {
        let scheduler = Scheduler::new(config.record_lifetime);
        Self {
            config,
            dispatcher: Dispatcher::new(scheduler),
            drained: Notify::new(),
        }
    }

    /// Start draining. Stops the server right away if nothing is registered.
    pub fn shutdown(&self) {
        let drained = self.dispatcher.scheduler().shutdown();
        if drained {
            info!("nothing registered, stopping");
            self.drained.notify_one();
        }
    }

    /// Called after every request and reaper pass.
    pub fn check_drained(&self) {
        let finished = {
            let scheduler = self.dispatcher.scheduler();
            scheduler.is_exiting() && scheduler.is_drained()
        };
        if finished {
            info!("all records drained, stopping");
            self.drained.notify_one();
        }
    }
}
