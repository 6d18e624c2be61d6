//! Background task enforcing the retention window.

use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::manager::StoreManager;

/// Sweeps every topic of `manager` once per `interval` until `shutdown` is
/// cancelled or the manager is dropped.
///
/// The first sweep happens one interval after startup. Each sweep runs on
/// the blocking pool because eviction is plain SQLite work.
pub(crate) async fn run_eviction_loop(
    manager: Weak<StoreManager>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "starting notification eviction task"
    );

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = sleep(interval) => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };

        let result = tokio::task::spawn_blocking(move || manager.evict_all(Utc::now())).await;

        match result {
            Ok(report) => {
                if report.removed > 0 {
                    tracing::info!(
                        removed = report.removed,
                        swept = report.swept,
                        failed = report.failed.len(),
                        "evicted expired notifications"
                    );
                } else {
                    tracing::debug!(
                        swept = report.swept,
                        failed = report.failed.len(),
                        "no expired notifications to evict"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "eviction sweep panicked or was cancelled");
            }
        }
    }

    tracing::info!("notification eviction task stopped");
}
