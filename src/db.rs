//! DB pool (C2, spec §2/§5): a bounded connection pool to the relational
//! store, with retry-on-connect and a usage monitor.
//!
//! Grounded on the teacher's `connect_db_with_retry` (exponential backoff
//! connect loop over `PgPoolOptions`).

use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};

pub async fn connect_with_retry(database_url: &str, pool_max: u32, max_retries: u32) -> Result<PgPool> {
    let mut attempt = 0u32;
    loop {
        match PgPoolOptions::new()
            .max_connections(pool_max)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!(pool_max, "connected to database");
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!("failed to connect to database after {attempt} attempts: {e}"));
                }
                let delay = Duration::from_secs(2u64.pow(attempt));
                warn!(attempt, error = %e, "database connection attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Connection-pool monitor (spec §5 "Shared resources"): samples
/// `{total, idle}` periodically, logs a warning above 70% utilization and
/// an error when no idle connections remain (clients are waiting). Only
/// runs when `is_production` is set, matching the teacher's
/// `NODE_ENV`-gated behaviors.
pub async fn monitor_pool(pool: PgPool, is_production: bool, sample_every: Duration) {
    if !is_production {
        return;
    }

    loop {
        tokio::time::sleep(sample_every).await;

        let total = pool.size();
        let idle = pool.num_idle() as u32;
        let in_use = total.saturating_sub(idle);
        let utilization = if total > 0 { in_use as f64 / total as f64 } else { 0.0 };

        if utilization > 0.7 {
            warn!(total, idle, in_use, utilization, "database pool usage above 70%");
        }

        if idle == 0 {
            error!(total, "no idle database connections available, clients are waiting");
        }
    }
}
