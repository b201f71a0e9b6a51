//! Periodic lifecycle pass.
//!
//! One loop owns both time-driven jobs: advancing election statuses to
//! whatever the event boundaries dictate, and tallying elections whose
//! voting window has closed. Running them in a single tick keeps the
//! ordering deterministic (an election completed by the status pass is
//! tallied in the same tick).

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::error;

use crate::lifecycle::Engine;

pub async fn lifecycle_polling_loop(engine: Arc<Engine>, tick_secs: u64) {
    let mut interval = interval(Duration::from_secs(tick_secs));

    loop {
        interval.tick().await;

        if let Err(e) = engine.run_scheduled_pass().await {
            error!("Error running lifecycle pass: {}", e);
        }
    }
}
