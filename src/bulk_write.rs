//! Bulk-write layer (C6, spec §4.4): conditional UPSERTs for
//! meetings/races/entrants/race_pools, transactional per-race time-series
//! appends, and typed transient/fatal error classification.
//!
//! Grounded on the teacher's `store_snapshots` (explicit `tx.begin()` /
//! per-row `sqlx::query` / `tx.commit()`) and the `ON CONFLICT ... DO
//! UPDATE` usage in `get_or_create_game`, generalized with a `WHERE
//! existing IS DISTINCT FROM incoming` predicate so no-op updates report
//! `rows_affected() == 0` and never touch `updated_at` (spec §4.4).

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::errors::{PartitionNotFoundError, WriteError};
use crate::models::{Entrant, Meeting, MoneyFlowHistory, OddsHistory, Race, RacePool};
use crate::partitions::partition_name;

#[derive(Debug, Default, Clone, Copy)]
pub struct RaceWriteCounts {
    pub meetings_upserted: u64,
    pub races_upserted: u64,
    pub entrants_upserted: u64,
    pub race_pools_upserted: u64,
    pub money_flow_inserted: u64,
    pub odds_inserted: u64,
}

/// Writes everything derived for one race inside a single transaction
/// (spec §4.4 step order, §5 "inside bulk write: the six steps execute in
/// order inside one transaction").
pub async fn write_race(
    pool: &PgPool,
    meeting: Option<&Meeting>,
    race: Option<&Race>,
    entrants: &[Entrant],
    race_pool: Option<&RacePool>,
    money_flow: &[MoneyFlowHistory],
    odds: &[OddsHistory],
    event_timestamp: DateTime<Utc>,
) -> Result<RaceWriteCounts, WriteError> {
    let mut tx = pool.begin().await.map_err(WriteError::classify)?;
    let mut counts = RaceWriteCounts::default();

    if let Some(meeting) = meeting {
        counts.meetings_upserted = upsert_meeting(&mut tx, meeting).await?;
    }
    if let Some(race) = race {
        counts.races_upserted = upsert_race(&mut tx, race).await?;
    }
    if !entrants.is_empty() {
        counts.entrants_upserted = upsert_entrants(&mut tx, entrants).await?;
    }
    if let Some(race_pool) = race_pool {
        counts.race_pools_upserted = upsert_race_pool(&mut tx, race_pool).await?;
    }
    if !money_flow.is_empty() {
        counts.money_flow_inserted = insert_money_flow_history(&mut tx, money_flow, event_timestamp).await?;
    }
    if !odds.is_empty() {
        counts.odds_inserted = insert_odds_history(&mut tx, odds, event_timestamp).await?;
    }

    tx.commit().await.map_err(WriteError::classify)?;
    Ok(counts)
}

async fn upsert_meeting(tx: &mut Transaction<'_, Postgres>, meeting: &Meeting) -> Result<u64, WriteError> {
    let result = sqlx::query(
        r#"
        INSERT INTO meetings (
            meeting_id, meeting_name, country, race_type, date,
            track_condition, tote_status, status, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (meeting_id) DO UPDATE SET
            meeting_name = EXCLUDED.meeting_name,
            country = EXCLUDED.country,
            race_type = EXCLUDED.race_type,
            date = EXCLUDED.date,
            track_condition = EXCLUDED.track_condition,
            tote_status = EXCLUDED.tote_status,
            status = EXCLUDED.status,
            updated_at = NOW()
        WHERE
            meetings.meeting_name IS DISTINCT FROM EXCLUDED.meeting_name
            OR meetings.country IS DISTINCT FROM EXCLUDED.country
            OR meetings.race_type IS DISTINCT FROM EXCLUDED.race_type
            OR meetings.date IS DISTINCT FROM EXCLUDED.date
            OR meetings.track_condition IS DISTINCT FROM EXCLUDED.track_condition
            OR meetings.tote_status IS DISTINCT FROM EXCLUDED.tote_status
            OR meetings.status IS DISTINCT FROM EXCLUDED.status
        "#,
    )
    .bind(&meeting.meeting_id)
    .bind(&meeting.meeting_name)
    .bind(meeting.country.as_str())
    .bind(meeting.race_type.as_str())
    .bind(meeting.date)
    .bind(&meeting.track_condition)
    .bind(&meeting.tote_status)
    .bind(meeting.status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(WriteError::classify)?;

    Ok(result.rows_affected())
}

async fn upsert_race(tx: &mut Transaction<'_, Postgres>, race: &Race) -> Result<u64, WriteError> {
    let result = sqlx::query(
        r#"
        INSERT INTO races (
            race_id, meeting_id, name, race_number, start_time,
            race_date_nz, status, actual_start, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (race_id) DO UPDATE SET
            name = EXCLUDED.name,
            race_number = EXCLUDED.race_number,
            start_time = EXCLUDED.start_time,
            race_date_nz = EXCLUDED.race_date_nz,
            status = EXCLUDED.status,
            actual_start = EXCLUDED.actual_start,
            updated_at = NOW()
        WHERE
            races.name IS DISTINCT FROM EXCLUDED.name
            OR races.race_number IS DISTINCT FROM EXCLUDED.race_number
            OR races.start_time IS DISTINCT FROM EXCLUDED.start_time
            OR races.race_date_nz IS DISTINCT FROM EXCLUDED.race_date_nz
            OR races.status IS DISTINCT FROM EXCLUDED.status
            OR races.actual_start IS DISTINCT FROM EXCLUDED.actual_start
        "#,
    )
    .bind(&race.race_id)
    .bind(&race.meeting_id)
    .bind(&race.name)
    .bind(race.race_number)
    .bind(race.start_time)
    .bind(race.race_date_nz)
    .bind(race.status.as_str())
    .bind(race.actual_start)
    .execute(&mut **tx)
    .await
    .map_err(WriteError::classify)?;

    Ok(result.rows_affected())
}

async fn upsert_entrants(tx: &mut Transaction<'_, Postgres>, entrants: &[Entrant]) -> Result<u64, WriteError> {
    let mut total = 0;
    for entrant in entrants {
        let result = sqlx::query(
            r#"
            INSERT INTO entrants (
                entrant_id, race_id, name, runner_number, barrier,
                is_scratched, is_late_scratched, fixed_win_odds, fixed_place_odds,
                pool_win_odds, pool_place_odds, hold_percentage, bet_percentage,
                win_pool_percentage, place_pool_percentage, win_pool_amount,
                place_pool_amount, jockey, trainer_name, silk_colours,
                favourite, mover, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, NOW()
            )
            ON CONFLICT (entrant_id) DO UPDATE SET
                name = EXCLUDED.name,
                runner_number = EXCLUDED.runner_number,
                barrier = EXCLUDED.barrier,
                is_scratched = EXCLUDED.is_scratched,
                is_late_scratched = EXCLUDED.is_late_scratched,
                fixed_win_odds = EXCLUDED.fixed_win_odds,
                fixed_place_odds = EXCLUDED.fixed_place_odds,
                pool_win_odds = EXCLUDED.pool_win_odds,
                pool_place_odds = EXCLUDED.pool_place_odds,
                hold_percentage = EXCLUDED.hold_percentage,
                bet_percentage = EXCLUDED.bet_percentage,
                win_pool_percentage = EXCLUDED.win_pool_percentage,
                place_pool_percentage = EXCLUDED.place_pool_percentage,
                win_pool_amount = EXCLUDED.win_pool_amount,
                place_pool_amount = EXCLUDED.place_pool_amount,
                jockey = EXCLUDED.jockey,
                trainer_name = EXCLUDED.trainer_name,
                silk_colours = EXCLUDED.silk_colours,
                favourite = EXCLUDED.favourite,
                mover = EXCLUDED.mover,
                updated_at = NOW()
            WHERE
                entrants.name IS DISTINCT FROM EXCLUDED.name
                OR entrants.runner_number IS DISTINCT FROM EXCLUDED.runner_number
                OR entrants.barrier IS DISTINCT FROM EXCLUDED.barrier
                OR entrants.is_scratched IS DISTINCT FROM EXCLUDED.is_scratched
                OR entrants.is_late_scratched IS DISTINCT FROM EXCLUDED.is_late_scratched
                OR entrants.fixed_win_odds IS DISTINCT FROM EXCLUDED.fixed_win_odds
                OR entrants.fixed_place_odds IS DISTINCT FROM EXCLUDED.fixed_place_odds
                OR entrants.pool_win_odds IS DISTINCT FROM EXCLUDED.pool_win_odds
                OR entrants.pool_place_odds IS DISTINCT FROM EXCLUDED.pool_place_odds
                OR entrants.hold_percentage IS DISTINCT FROM EXCLUDED.hold_percentage
                OR entrants.bet_percentage IS DISTINCT FROM EXCLUDED.bet_percentage
                OR entrants.win_pool_percentage IS DISTINCT FROM EXCLUDED.win_pool_percentage
                OR entrants.place_pool_percentage IS DISTINCT FROM EXCLUDED.place_pool_percentage
                OR entrants.win_pool_amount IS DISTINCT FROM EXCLUDED.win_pool_amount
                OR entrants.place_pool_amount IS DISTINCT FROM EXCLUDED.place_pool_amount
                OR entrants.jockey IS DISTINCT FROM EXCLUDED.jockey
                OR entrants.trainer_name IS DISTINCT FROM EXCLUDED.trainer_name
                OR entrants.silk_colours IS DISTINCT FROM EXCLUDED.silk_colours
                OR entrants.favourite IS DISTINCT FROM EXCLUDED.favourite
                OR entrants.mover IS DISTINCT FROM EXCLUDED.mover
            "#,
        )
        .bind(&entrant.entrant_id)
        .bind(&entrant.race_id)
        .bind(&entrant.name)
        .bind(entrant.runner_number)
        .bind(entrant.barrier)
        .bind(entrant.is_scratched)
        .bind(entrant.is_late_scratched)
        .bind(entrant.fixed_win_odds)
        .bind(entrant.fixed_place_odds)
        .bind(entrant.pool_win_odds)
        .bind(entrant.pool_place_odds)
        .bind(entrant.hold_percentage)
        .bind(entrant.bet_percentage)
        .bind(entrant.win_pool_percentage)
        .bind(entrant.place_pool_percentage)
        .bind(entrant.win_pool_amount)
        .bind(entrant.place_pool_amount)
        .bind(&entrant.jockey)
        .bind(&entrant.trainer_name)
        .bind(&entrant.silk_colours)
        .bind(entrant.favourite)
        .bind(entrant.mover)
        .execute(&mut **tx)
        .await
        .map_err(WriteError::classify)?;

        total += result.rows_affected();
    }
    Ok(total)
}

async fn upsert_race_pool(tx: &mut Transaction<'_, Postgres>, pool: &RacePool) -> Result<u64, WriteError> {
    let result = sqlx::query(
        r#"
        INSERT INTO race_pools (
            race_id, win_pool_total, place_pool_total, quinella_pool_total,
            trifecta_pool_total, exacta_pool_total, first4_pool_total,
            total_race_pool, currency, last_updated, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
        ON CONFLICT (race_id) DO UPDATE SET
            win_pool_total = EXCLUDED.win_pool_total,
            place_pool_total = EXCLUDED.place_pool_total,
            quinella_pool_total = EXCLUDED.quinella_pool_total,
            trifecta_pool_total = EXCLUDED.trifecta_pool_total,
            exacta_pool_total = EXCLUDED.exacta_pool_total,
            first4_pool_total = EXCLUDED.first4_pool_total,
            total_race_pool = EXCLUDED.total_race_pool,
            currency = EXCLUDED.currency,
            last_updated = EXCLUDED.last_updated,
            updated_at = NOW()
        WHERE
            race_pools.win_pool_total IS DISTINCT FROM EXCLUDED.win_pool_total
            OR race_pools.place_pool_total IS DISTINCT FROM EXCLUDED.place_pool_total
            OR race_pools.quinella_pool_total IS DISTINCT FROM EXCLUDED.quinella_pool_total
            OR race_pools.trifecta_pool_total IS DISTINCT FROM EXCLUDED.trifecta_pool_total
            OR race_pools.exacta_pool_total IS DISTINCT FROM EXCLUDED.exacta_pool_total
            OR race_pools.first4_pool_total IS DISTINCT FROM EXCLUDED.first4_pool_total
            OR race_pools.total_race_pool IS DISTINCT FROM EXCLUDED.total_race_pool
            OR race_pools.currency IS DISTINCT FROM EXCLUDED.currency
        "#,
    )
    .bind(&pool.race_id)
    .bind(pool.win_pool_total)
    .bind(pool.place_pool_total)
    .bind(pool.quinella_pool_total)
    .bind(pool.trifecta_pool_total)
    .bind(pool.exacta_pool_total)
    .bind(pool.first4_pool_total)
    .bind(pool.total_race_pool)
    .bind(&pool.currency)
    .bind(pool.last_updated)
    .execute(&mut **tx)
    .await
    .map_err(WriteError::classify)?;

    Ok(result.rows_affected())
}

/// Appends to today's `money_flow_history_YYYY_MM_DD` partition. A missing
/// partition surfaces as `PartitionNotFoundError` (spec §4.4/§7), which
/// `race_processor`/the scheduler treat as retriable after a compensating
/// create attempt.
async fn insert_money_flow_history(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[MoneyFlowHistory],
    event_timestamp: DateTime<Utc>,
) -> Result<u64, WriteError> {
    let partition = partition_name("money_flow_history", event_timestamp.date_naive());
    ensure_partition_exists(tx, "money_flow_history", &partition).await?;

    let mut total = 0;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO money_flow_history (
                entrant_id, race_id, time_to_start, time_interval, interval_type,
                polling_timestamp, win_pool_percentage, place_pool_percentage,
                win_pool_amount, place_pool_amount, incremental_win_amount,
                incremental_place_amount, fixed_win_odds, fixed_place_odds,
                pool_win_odds, pool_place_odds, event_timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&row.entrant_id)
        .bind(&row.race_id)
        .bind(row.time_to_start)
        .bind(row.time_interval)
        .bind(row.interval_type.as_str())
        .bind(row.polling_timestamp)
        .bind(row.win_pool_percentage)
        .bind(row.place_pool_percentage)
        .bind(row.win_pool_amount)
        .bind(row.place_pool_amount)
        .bind(row.incremental_win_amount)
        .bind(row.incremental_place_amount)
        .bind(row.fixed_win_odds)
        .bind(row.fixed_place_odds)
        .bind(row.pool_win_odds)
        .bind(row.pool_place_odds)
        .bind(row.event_timestamp)
        .execute(&mut **tx)
        .await
        .map_err(WriteError::classify)?;

        total += result.rows_affected();
    }
    Ok(total)
}

async fn insert_odds_history(
    tx: &mut Transaction<'_, Postgres>,
    rows: &[OddsHistory],
    event_timestamp: DateTime<Utc>,
) -> Result<u64, WriteError> {
    let partition = partition_name("odds_history", event_timestamp.date_naive());
    ensure_partition_exists(tx, "odds_history", &partition).await?;

    let mut total = 0;
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO odds_history (entrant_id, odds, type, event_timestamp)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&row.entrant_id)
        .bind(row.odds)
        .bind(row.odds_type.as_str())
        .bind(row.event_timestamp)
        .execute(&mut **tx)
        .await
        .map_err(WriteError::classify)?;

        total += result.rows_affected();
    }
    Ok(total)
}

/// Checks `pg_catalog` for the partition's existence before the insert
/// loop, so a missing partition is reported once as a typed error rather
/// than as N generic constraint-violation errors.
async fn ensure_partition_exists(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    partition: &str,
) -> Result<(), WriteError> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(partition)
        .fetch_one(&mut **tx)
        .await
        .map_err(WriteError::classify)?;

    if exists {
        Ok(())
    } else {
        Err(WriteError::MissingPartition(PartitionNotFoundError::new(table, partition)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_classifies_postgres_codes() {
        // Classification logic is exercised indirectly through
        // `WriteError::classify`'s match arms in errors.rs; here we only
        // assert the retriable predicate wiring compiles and behaves for
        // the constructed variants used by this module.
        let missing = WriteError::MissingPartition(PartitionNotFoundError::new("odds_history", "odds_history_2026_07_28"));
        assert!(missing.retriable());
    }
}
