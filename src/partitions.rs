//! Daily partition naming and creation (C7, spec §4.4/§4.8).
//!
//! Partitions are named `{table}_YYYY_MM_DD`, keyed on `event_timestamp`.
//! Creation is idempotent (`IF NOT EXISTS`) and single-flighted so that
//! concurrent callers (the midnight job and a compensating create inside
//! the bulk-write layer) share one in-progress creation rather than
//! racing duplicate DDL — generalized from the teacher's retry-with-backoff
//! connect loops into a `tokio::sync::Mutex`-guarded dedup map.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::info;

pub const TIME_SERIES_TABLES: [&str; 2] = ["money_flow_history", "odds_history"];

pub fn partition_name(table: &str, date: NaiveDate) -> String {
    format!("{table}_{}", date.format("%Y_%m_%d"))
}

/// Single-flight guard over partition creation: tracks which
/// `(table, date)` pairs have already been created this process lifetime
/// so a flurry of compensating-create calls collapses to one DDL
/// statement per partition.
#[derive(Clone)]
pub struct PartitionManager {
    pool: PgPool,
    created: Arc<Mutex<HashSet<String>>>,
}

impl PartitionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, created: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Idempotently create the partition for `table`/`date`. A second call
    /// for the same partition, whether concurrent or sequential, is a
    /// no-op (spec §8 "creating the same partition twice is a no-op").
    pub async fn ensure_partition(&self, table: &str, date: NaiveDate) -> Result<(), sqlx::Error> {
        let name = partition_name(table, date);

        // Held across the DDL execution (not just the `contains` check) so a
        // concurrent second caller for the same partition actually awaits
        // the first rather than racing its own CREATE TABLE statement.
        let mut created = self.created.lock().await;
        if created.contains(&name) {
            return Ok(());
        }

        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS {name} PARTITION OF {table}
               FOR VALUES FROM ('{date}') TO ('{next_day}')"#,
            name = name,
            table = table,
            date = date.format("%Y-%m-%d"),
            next_day = (date + chrono::Duration::days(1)).format("%Y-%m-%d"),
        );

        sqlx::query(&ddl).execute(&self.pool).await?;

        if created.insert(name.clone()) {
            info!(partition = %name, "created partition");
        }
        Ok(())
    }

    /// Create tomorrow's partitions for both time-series tables (C12).
    pub async fn create_tomorrow_partitions(&self, today: NaiveDate) -> Result<(), sqlx::Error> {
        let tomorrow = today + chrono::Duration::days(1);
        for table in TIME_SERIES_TABLES {
            self.ensure_partition(table, tomorrow).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn partition_name_matches_spec_format() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        assert_eq!(partition_name("money_flow_history", date), "money_flow_history_2026_07_28");
        assert_eq!(partition_name("odds_history", date), "odds_history_2026_07_28");
    }

    #[test]
    fn partition_name_zero_pads_month_and_day() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(partition_name("odds_history", date), "odds_history_2026_01_05");
    }
}
