//! Batch Processor (C9, spec §4.6): runs N races in parallel with a
//! concurrency cap derived from pool size, isolating individual failures.
//!
//! Grounded on the `beiju-mmoldb` ingest reference's parallel fan-out
//! shape, implemented here with a `tokio::sync::Semaphore` and
//! `futures::future::join_all`.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use crate::errors::RaceProcessError;
use crate::models::RaceStatus;
use crate::race_processor::{self, RaceProcessOutcome};
use crate::transform::PreviousAmounts;
use crate::upstream::UpstreamClient;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Default)]
pub struct BatchMetrics {
    pub successes: usize,
    pub failures: usize,
    pub retryable_failures: usize,
    pub effective_concurrency: usize,
}

#[derive(Debug)]
pub struct BatchResult {
    pub results: Vec<RaceProcessOutcome>,
    pub errors: Vec<(String, RaceProcessError)>,
    pub metrics: BatchMetrics,
}

pub async fn process_races(
    race_ids: &[(String, Option<RaceStatus>)],
    max_concurrency: usize,
    db_pool_max: usize,
    upstream: Arc<UpstreamClient>,
    worker_pool: Arc<WorkerPool>,
    db: PgPool,
    previous_amounts: Arc<PreviousAmounts>,
) -> BatchResult {
    let effective_concurrency = max_concurrency.min(db_pool_max).max(1);
    let semaphore = Arc::new(Semaphore::new(effective_concurrency));

    let futures = race_ids.iter().cloned().map(|(race_id, status_hint)| {
        let semaphore = semaphore.clone();
        let upstream = upstream.clone();
        let worker_pool = worker_pool.clone();
        let db = db.clone();
        let previous_amounts = previous_amounts.clone();

        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            let outcome =
                race_processor::process_race(&race_id, status_hint, &upstream, &worker_pool, &db, &previous_amounts)
                    .await;
            (race_id, outcome)
        }
    });

    let outcomes = futures::future::join_all(futures).await;

    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut metrics = BatchMetrics { effective_concurrency, ..Default::default() };

    for (race_id, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                metrics.successes += 1;
                results.push(result);
            }
            Err(err) => {
                metrics.failures += 1;
                if err.retriable() {
                    metrics.retryable_failures += 1;
                }
                errors.push((race_id, err));
            }
        }
    }

    BatchResult { results, errors, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_concurrency_never_exceeds_pool_max() {
        let cap = 50usize.min(10).max(1);
        assert_eq!(cap, 10);
    }
}
