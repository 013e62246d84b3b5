//! Race Processor (C8, spec §4.5): orchestrates fetch → transform → write
//! for one race, with per-step timings and a 2000ms budget warning.
//!
//! Grounded on the teacher's `poll_once`/`run` timing style
//! (`std::time::Instant::now()` / `start.elapsed()`).

use std::time::Instant;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::bulk_write::{self, RaceWriteCounts};
use crate::errors::RaceProcessError;
use crate::models::RaceStatus;
use crate::quality;
use crate::transform::PreviousAmounts;
use crate::upstream::UpstreamClient;
use crate::worker_pool::WorkerPool;

const RACE_BUDGET_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, Default)]
pub struct RaceTimings {
    pub fetch_ms: u64,
    pub transform_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug)]
pub struct RaceProcessOutcome {
    pub race_id: String,
    pub success: bool,
    pub timings: RaceTimings,
    pub row_counts: RaceWriteCounts,
}

pub async fn process_race(
    race_id: &str,
    status_hint: Option<RaceStatus>,
    upstream: &UpstreamClient,
    worker_pool: &WorkerPool,
    pool: &PgPool,
    previous_amounts: &PreviousAmounts,
) -> Result<RaceProcessOutcome, RaceProcessError> {
    let total_start = Instant::now();

    let fetch_start = Instant::now();
    let raw = upstream.fetch_race_data(race_id, status_hint).await?;
    let fetch_ms = fetch_start.elapsed().as_millis() as u64;

    let transform_start = Instant::now();
    let current_time = Utc::now();
    let transformed = worker_pool
        .exec(raw, current_time, previous_amounts.clone())
        .await
        .map_err(RaceProcessError::Shutdown)?
        .map_err(RaceProcessError::Transform)?;
    let transform_ms = transform_start.elapsed().as_millis() as u64;

    let quality_report = quality::assess(&transformed);
    if quality::is_low_quality(&quality_report) {
        warn!(
            race_id,
            quality_score = quality_report.quality_score,
            warnings = ?quality_report.warnings,
            errors = ?quality_report.errors,
            "low data quality score, ingesting anyway"
        );
    }

    let write_start = Instant::now();
    let row_counts = bulk_write::write_race(
        pool,
        transformed.meeting.as_ref(),
        transformed.race.as_ref(),
        &transformed.entrants,
        transformed.race_pool.as_ref(),
        &transformed.money_flow_records,
        &transformed.odds_records,
        current_time,
    )
    .await
    .map_err(RaceProcessError::Write)?;
    let write_ms = write_start.elapsed().as_millis() as u64;

    let total_ms = total_start.elapsed().as_millis() as u64;
    let timings = RaceTimings { fetch_ms, transform_ms, write_ms, total_ms };
    let over_budget = total_ms > RACE_BUDGET_MS;

    if over_budget {
        warn!(
            race_id,
            fetch_ms, transform_ms, write_ms, total_ms, over_budget, "race processing exceeded budget"
        );
    } else {
        info!(race_id, fetch_ms, transform_ms, write_ms, total_ms, over_budget, "race processed");
    }

    Ok(RaceProcessOutcome { race_id: race_id.to_string(), success: true, timings, row_counts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_threshold_matches_spec() {
        assert_eq!(RACE_BUDGET_MS, 2000);
    }
}
