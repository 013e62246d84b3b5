//! Horse-racing data ingestion engine.
//!
//! Polls an upstream racing affiliate API on a dynamic, per-race schedule,
//! transforms payloads into normalized rows plus money-flow/odds-history
//! time series, and bulk-writes them transactionally. Exposes a read-only
//! HTTP API over the persisted state.

mod batch_processor;
mod bulk_write;
mod config;
mod daily_init;
mod db;
mod errors;
mod logging;
mod models;
mod partition_scheduler;
mod partitions;
mod quality;
mod race_processor;
mod read_api;
mod scheduler;
mod shutdown;
mod transform;
mod upstream;
mod worker_pool;

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::partitions::PartitionManager;
use crate::scheduler::{DynamicScheduler, RaceSnapshot};
use crate::transform::PreviousAmounts;
use crate::upstream::UpstreamClient;
use crate::worker_pool::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    logging::init(&config.log_level, config.log_format);

    info!(port = config.port, "starting raceday ingestion engine");

    let db_pool = db::connect_with_retry(&config.database_url, config.db_pool_max, 5).await?;

    let upstream = Arc::new(UpstreamClient::new(
        config.upstream_base_url.clone(),
        config.upstream_api_key.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
        config.upstream_requests_per_minute,
    )?);

    let worker_pool = Arc::new(WorkerPool::new(config.max_worker_threads, config.worker_max_attempts));
    let shutdown_token = shutdown::root_token();

    let partition_manager = PartitionManager::new(db_pool.clone());
    let partition_scheduler_handle = {
        let manager = partition_manager.clone();
        let token = shutdown_token.clone();
        tokio::spawn(partition_scheduler::run(manager, token))
    };

    let today = Utc::now().date_naive();
    // First ingest of the day: no money-flow history exists yet, so every
    // entrant's previous amounts are unknown and incremental deltas equal
    // their current totals (spec §4.2 "current when no previous bucket").
    let empty_previous_amounts: Arc<PreviousAmounts> = Arc::new(PreviousAmounts::new());
    match daily_init::run(
        today,
        upstream.clone(),
        worker_pool.clone(),
        db_pool.clone(),
        empty_previous_amounts,
        config.max_worker_threads.max(1),
        config.db_pool_max as usize,
    )
    .await
    {
        Ok(summary) => info!(?summary, "daily initialization finished"),
        Err(e) => error!(error = %e, "daily initialization failed, continuing with scheduler anyway"),
    }

    let evening_backfill_handle = if config.evening_backfill_enabled {
        match &config.evening_backfill_cron {
            Some(cron) => {
                let token = shutdown_token.clone();
                Some(tokio::spawn(daily_init::run_scheduled_backfill(
                    cron.clone(),
                    upstream.clone(),
                    worker_pool.clone(),
                    db_pool.clone(),
                    config.scalar_key_batch_size,
                    config.db_pool_max as usize,
                    token,
                )))
            }
            None => {
                warn!("EVENING_BACKFILL_ENABLED is true but EVENING_BACKFILL_CRON is unset, skipping evening backfill");
                None
            }
        }
    } else {
        None
    };

    let scheduler = build_scheduler(db_pool.clone(), upstream.clone(), worker_pool.clone());
    scheduler.start().await;

    let pool_monitor_handle = {
        let pool = db_pool.clone();
        let is_production = config.is_production;
        tokio::spawn(db::monitor_pool(pool, is_production, std::time::Duration::from_secs(15)))
    };

    let read_api_router = read_api::router(db_pool.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!(port = config.port, "read API listening");

    let server_token = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, read_api_router)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    shutdown::wait_for_signal().await;
    info!("shutdown signal received, tearing down subsystems in order");
    shutdown_token.cancel();

    shutdown::with_timeout("read-api-server", async {
        if let Err(e) = server_handle.await {
            warn!(error = %e, "read API server task join error");
        }
    })
    .await;

    shutdown::with_timeout("partition-scheduler", async {
        partition_scheduler_handle.abort();
        let _ = partition_scheduler_handle.await;
    })
    .await;

    if let Some(handle) = evening_backfill_handle {
        shutdown::with_timeout("evening-backfill", async {
            handle.abort();
            let _ = handle.await;
        })
        .await;
    }

    shutdown::with_timeout("dynamic-scheduler", async {
        scheduler.stop().await;
    })
    .await;

    shutdown::with_timeout("pool-monitor", async {
        pool_monitor_handle.abort();
        let _ = pool_monitor_handle.await;
    })
    .await;

    shutdown::with_timeout("db-pool", async {
        db_pool.close().await;
    })
    .await;

    shutdown::with_timeout("worker-pool", async {
        worker_pool.shutdown();
    })
    .await;

    info!("shutdown complete");
    Ok(())
}

/// Wires the dynamic scheduler's two callbacks: fetching races in the
/// re-evaluation window, and processing a single race when its timer fires.
fn build_scheduler(
    db_pool: sqlx::PgPool,
    upstream: Arc<UpstreamClient>,
    worker_pool: Arc<WorkerPool>,
) -> Arc<DynamicScheduler> {
    let race_source: scheduler::RaceSourceFn = {
        let db_pool = db_pool.clone();
        Arc::new(move |window_start, window_end| {
            let db_pool = db_pool.clone();
            Box::pin(async move { fetch_races_in_window(&db_pool, window_start, window_end).await })
        })
    };

    let poll: scheduler::PollFn = {
        let upstream = upstream.clone();
        let worker_pool = worker_pool.clone();
        let db_pool = db_pool.clone();
        Arc::new(move |race_id, status_hint| {
            let upstream = upstream.clone();
            let worker_pool = worker_pool.clone();
            let db_pool = db_pool.clone();
            Box::pin(async move { poll_one_race(race_id, status_hint, upstream, worker_pool, db_pool).await })
        })
    };

    Arc::new(DynamicScheduler::new(race_source, poll))
}

async fn fetch_races_in_window(
    db_pool: &sqlx::PgPool,
    window_start: chrono::DateTime<Utc>,
    window_end: chrono::DateTime<Utc>,
) -> anyhow::Result<Vec<RaceSnapshot>> {
    #[derive(sqlx::FromRow)]
    struct Row {
        race_id: String,
        start_time: chrono::DateTime<Utc>,
        status: String,
        actual_start: Option<chrono::DateTime<Utc>>,
    }

    let rows: Vec<Row> = sqlx::query_as(
        "SELECT race_id, start_time, status, actual_start FROM races WHERE start_time BETWEEN $1 AND $2",
    )
    .bind(window_start)
    .bind(window_end)
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| RaceSnapshot {
            race_id: r.race_id,
            start_time: r.start_time,
            status: models::RaceStatus::from_upstream(&r.status),
            actual_start: r.actual_start,
        })
        .collect())
}

async fn poll_one_race(
    race_id: String,
    status_hint: Option<models::RaceStatus>,
    upstream: Arc<UpstreamClient>,
    worker_pool: Arc<WorkerPool>,
    db_pool: sqlx::PgPool,
) -> Option<models::RaceStatus> {
    let previous_amounts = load_previous_amounts(&db_pool, &race_id).await.unwrap_or_else(|e| {
        warn!(race_id, error = %e, "failed to load previous pool amounts, treating as first poll");
        PreviousAmounts::new()
    });

    match race_processor::process_race(&race_id, status_hint, &upstream, &worker_pool, &db_pool, &previous_amounts).await
    {
        Ok(outcome) => {
            info!(race_id = %outcome.race_id, total_ms = outcome.timings.total_ms, "scheduled poll completed");
            fetch_current_status(&db_pool, &race_id).await
        }
        Err(err) => {
            warn!(race_id = %race_id, error = %err, retriable = err.retriable(), "scheduled poll failed");
            status_hint
        }
    }
}

/// Loads each entrant's most recent `(win_cents, place_cents)` pair from
/// `money_flow_history`, giving the transform engine the "previous bucket"
/// values it needs for incremental deltas (spec §4.2).
async fn load_previous_amounts(db_pool: &sqlx::PgPool, race_id: &str) -> Result<PreviousAmounts, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct Row {
        entrant_id: String,
        win_pool_amount: Option<i64>,
        place_pool_amount: Option<i64>,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT DISTINCT ON (entrant_id) entrant_id, win_pool_amount, place_pool_amount
        FROM money_flow_history
        WHERE race_id = $1
        ORDER BY entrant_id, event_timestamp DESC
        "#,
    )
    .bind(race_id)
    .fetch_all(db_pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.entrant_id, (r.win_pool_amount.unwrap_or(0), r.place_pool_amount.unwrap_or(0))))
        .collect())
}

/// Re-reads the race's current status from the database after a
/// successful write, so the scheduler can react immediately to a
/// newly-observed terminal status rather than waiting a full tick.
async fn fetch_current_status(db_pool: &sqlx::PgPool, race_id: &str) -> Option<models::RaceStatus> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM races WHERE race_id = $1")
        .bind(race_id)
        .fetch_optional(db_pool)
        .await
        .ok()
        .flatten();

    status.map(|s| models::RaceStatus::from_upstream(&s))
}
