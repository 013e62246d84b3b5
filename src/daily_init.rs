//! Daily Initializer (C11, spec §4.8): once per racing day, fetch every
//! AU/NZ thoroughbred/harness meeting, bulk-process every race it lists,
//! and hand control to the dynamic scheduler. Optionally re-runs on a
//! daily evening schedule as a backfill pass.
//!
//! Grounded on the teacher's startup sequence in `OddsIngestionService::run`
//! (fetch the day's slate once, then start the recurring poller) and reuses
//! the batch processor (C9) for the initial fan-out. The evening schedule
//! loop follows `partition_scheduler::run`'s sleep-until-deadline shape
//! rather than pulling in a cron crate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch_processor::{self, BatchResult};
use crate::transform::PreviousAmounts;
use crate::upstream::UpstreamClient;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Default)]
pub struct DailyInitSummary {
    pub meetings_count: usize,
    pub races_count: usize,
    pub races_succeeded: usize,
    pub races_failed: usize,
}

/// Runs the full-slate backfill for `date` (spec §4.8: "fetch meetings for
/// the day, filter to AU/NZ thoroughbred/harness, process every listed race
/// once before scheduling begins").
pub async fn run(
    date: NaiveDate,
    upstream: Arc<UpstreamClient>,
    worker_pool: Arc<WorkerPool>,
    db: PgPool,
    previous_amounts: Arc<PreviousAmounts>,
    max_concurrency: usize,
    db_pool_max: usize,
) -> anyhow::Result<DailyInitSummary> {
    info!(%date, "starting daily initialization");

    let meetings = upstream.fetch_meetings_for_date(date).await?;

    let race_ids: Vec<(String, Option<crate::models::RaceStatus>)> = meetings
        .iter()
        .flat_map(|meeting| meeting.races.iter().map(|race| (race.race_id.clone(), None)))
        .collect();

    if race_ids.is_empty() {
        warn!(%date, meetings = meetings.len(), "no races found for daily initialization");
        return Ok(DailyInitSummary { meetings_count: meetings.len(), ..Default::default() });
    }

    let BatchResult { metrics, errors, .. } =
        batch_processor::process_races(&race_ids, max_concurrency, db_pool_max, upstream, worker_pool, db, previous_amounts)
            .await;

    for (race_id, err) in &errors {
        warn!(race_id = %race_id, error = %err, retriable = err.retriable(), "daily initialization race failed");
    }

    let summary = DailyInitSummary {
        meetings_count: meetings.len(),
        races_count: race_ids.len(),
        races_succeeded: metrics.successes,
        races_failed: metrics.failures,
    };

    info!(
        meetings = summary.meetings_count,
        races = summary.races_count,
        succeeded = summary.races_succeeded,
        failed = summary.races_failed,
        "daily initialization complete"
    );

    Ok(summary)
}

/// Runs the evening backfill on a daily schedule (spec §4.8 "and optionally
/// in the evening", §6.3 `EVENING_BACKFILL_CRON`). `cron_expr` is a standard
/// 5-field cron string; only the minute and hour fields are honored, since
/// the backfill always runs once per racing day. Uses
/// `scalar_key_batch_size` as the fan-out width rather than
/// `max_worker_threads`, since the spec documents it specifically as "the
/// back-fill batch size".
pub async fn run_scheduled_backfill(
    cron_expr: String,
    upstream: Arc<UpstreamClient>,
    worker_pool: Arc<WorkerPool>,
    db: PgPool,
    batch_size: usize,
    db_pool_max: usize,
    shutdown: CancellationToken,
) {
    let Some((hour, minute)) = parse_cron_hour_minute(&cron_expr) else {
        error!(cron = %cron_expr, "EVENING_BACKFILL_CRON is not a recognized 5-field cron expression, backfill disabled");
        return;
    };

    loop {
        let sleep_duration = duration_until_next(hour, minute);
        info!(hour, minute, sleep_secs = sleep_duration.as_secs(), "evening backfill sleeping until next run");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("evening backfill shutting down");
                return;
            }
            _ = tokio::time::sleep(sleep_duration) => {}
        }

        let today = Utc::now().date_naive();
        let previous_amounts = Arc::new(PreviousAmounts::new());
        match run(
            today,
            upstream.clone(),
            worker_pool.clone(),
            db.clone(),
            previous_amounts,
            batch_size.max(1),
            db_pool_max,
        )
        .await
        {
            Ok(summary) => info!(?summary, "evening backfill finished"),
            Err(e) => error!(error = %e, "evening backfill failed"),
        }
    }
}

/// Parses the minute/hour fields of a standard 5-field cron string
/// (`minute hour day month weekday`). Day/month/weekday fields are ignored;
/// only a fixed daily time-of-day is supported.
fn parse_cron_hour_minute(cron_expr: &str) -> Option<(u32, u32)> {
    let mut fields = cron_expr.split_whitespace();
    let minute: u32 = fields.next()?.parse().ok()?;
    let hour: u32 = fields.next()?.parse().ok()?;
    if minute > 59 || hour > 23 {
        return None;
    }
    Some((hour, minute))
}

fn duration_until_next(hour: u32, minute: u32) -> Duration {
    let now = Utc::now();
    let today_at = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("validated hour/minute are always a valid time")
        .and_utc();

    let next_run = if today_at > now { today_at } else { today_at + chrono::Duration::days(1) };
    (next_run - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_hour_from_standard_cron() {
        assert_eq!(parse_cron_hour_minute("30 19 * * *"), Some((19, 30)));
        assert_eq!(parse_cron_hour_minute("0 0 * * *"), Some((0, 0)));
    }

    #[test]
    fn rejects_malformed_or_out_of_range_cron() {
        assert_eq!(parse_cron_hour_minute("not a cron"), None);
        assert_eq!(parse_cron_hour_minute("60 19 * * *"), None);
        assert_eq!(parse_cron_hour_minute("30 24 * * *"), None);
        assert_eq!(parse_cron_hour_minute(""), None);
    }

    #[test]
    fn duration_until_next_is_never_more_than_a_day_away() {
        let duration = duration_until_next(19, 30);
        assert!(duration.as_secs() <= 86_400);
    }

    #[test]
    fn empty_meeting_list_yields_zero_race_summary() {
        let summary = DailyInitSummary::default();
        assert_eq!(summary.races_count, 0);
        assert_eq!(summary.races_succeeded, 0);
    }
}
