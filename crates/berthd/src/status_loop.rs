//! Periodic status reconciliation.

use std::sync::Arc;
use std::time::Duration;

use berth_provisioner::{ContainerStatus, Provisioner};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Run CollectStatus every `interval` until `shutdown` flips.
pub async fn run(provisioner: Arc<Provisioner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs = interval.as_secs(), "status collector started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => pass(&provisioner).await,
            _ = shutdown.changed() => {
                info!("status collector shutting down");
                break;
            }
        }
    }
}

async fn pass(provisioner: &Provisioner) {
    match provisioner.collect_status().await {
        Ok(units) => {
            let errored = units
                .iter()
                .filter(|u| u.status == ContainerStatus::Error)
                .count();
            if errored > 0 {
                warn!(units = units.len(), errored, "status collected with errored units");
            } else {
                debug!(units = units.len(), "status collected");
            }
        }
        Err(e) => warn!(error = %e, "status collection failed"),
    }
}
