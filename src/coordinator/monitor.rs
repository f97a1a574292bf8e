use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::coordinator::Scheduler;

/// Background loop that hands abandoned tasks out again.
///
/// Wakes every `interval` and requeues whatever has been leased for longer
/// than `lease`. Returns once the job is done, since nothing can be leased
/// after that.
pub async fn monitor_leases(scheduler: Arc<Scheduler>, interval: Duration, lease: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        if scheduler.is_job_done() {
            debug!("job done, lease monitor exiting");
            return;
        }

        let reclaimed = scheduler.reclaim_expired(lease);
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed expired leases");
        }
    }
}
