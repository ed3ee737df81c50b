//! Background worker driving the orchestration loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::controller::TestController;

/// Owns the poll loop and the completion worker.
///
/// Poll ticks run sequentially on one task, so a pass that outlives the
/// interval delays the next one instead of overlapping it.
pub struct MasterWorker {
    controller: Arc<TestController>,
    poll_interval: Duration,
}

impl MasterWorker {
    pub fn new(controller: Arc<TestController>, poll_interval: Duration) -> Self {
        Self {
            controller,
            poll_interval,
        }
    }

    /// Runs until the shutdown channel flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.poll_interval, "Master worker started");

        let completion_controller = Arc::clone(&self.controller);
        let completion_shutdown = shutdown.clone();
        let completions = tokio::spawn(async move {
            completion_controller
                .run_completions(completion_shutdown)
                .await;
        });

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Poll tick");
                    self.controller.activate_tests().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Master worker shutting down");
                        break;
                    }
                }
            }
        }

        let _ = completions.await;
        info!("Master worker stopped");
    }
}
