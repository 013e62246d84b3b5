//! Partition Scheduler (C12, spec §4.8): a midnight job that creates
//! tomorrow's time-series partitions ahead of time, so the first write of
//! the new day never hits a missing-partition error.
//!
//! Grounded on the teacher's `tokio::spawn` background-task style, using
//! `tokio::time::sleep` against a computed midnight deadline rather than a
//! cron crate, since the job fires once a day at a fixed wall-clock time.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::partitions::PartitionManager;

/// Runs until `shutdown` is cancelled. Ensures today's and tomorrow's
/// partitions exist immediately, then re-runs every 24h at midnight UTC.
pub async fn run(manager: PartitionManager, shutdown: CancellationToken) {
    let today = Utc::now().date_naive();
    if let Err(e) = manager.create_tomorrow_partitions(today).await {
        error!(error = %e, "failed to create initial partitions");
    }
    for table in crate::partitions::TIME_SERIES_TABLES {
        if let Err(e) = manager.ensure_partition(table, today).await {
            error!(error = %e, table, "failed to ensure today's partition");
        }
    }

    loop {
        let sleep_duration = duration_until_next_midnight();
        info!(sleep_secs = sleep_duration.as_secs(), "partition scheduler sleeping until next midnight");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("partition scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(sleep_duration) => {}
        }

        let today = Utc::now().date_naive();
        if let Err(e) = manager.create_tomorrow_partitions(today).await {
            error!(error = %e, "failed to create tomorrow's partitions");
        } else {
            info!(%today, "created tomorrow's partitions");
        }
    }
}

fn duration_until_next_midnight() -> Duration {
    let now = Utc::now();
    let tomorrow = now.date_naive() + chrono::Duration::days(1);
    let next_midnight = tomorrow.and_hms_opt(0, 0, 0).expect("midnight is always valid").and_utc();
    (next_midnight - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_midnight_is_never_more_than_a_day_away() {
        let duration = duration_until_next_midnight();
        assert!(duration.as_secs() <= 86_400);
    }
}
