//! Transform engine (C4, spec §4.2): pure, deterministic functions mapping
//! a raw race payload into normalized rows and money-flow/odds-history
//! records. No I/O; the "previous bucket amounts" needed for incremental
//! deltas are passed in rather than queried here, so the function stays a
//! pure mapping over its inputs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{
    Country, Entrant, IntervalType, Meeting, MeetingStatus, OddsHistory, OddsType, RacePool,
    RaceType, RawEntrant, RawRaceData, Race, RaceStatus, MoneyFlowHistory,
    TransformedRace,
};

/// Previous (win_cents, place_cents) pool amounts per entrant, keyed by
/// `entrant_id`, as last recorded in `MoneyFlowHistory`.
pub type PreviousAmounts = HashMap<String, (i64, i64)>;

/// Auckland's fixed UTC offset range is +12:00/+13:00 (NZDT); we use the
/// IANA tz database via `chrono-tz` rather than hand-rolling DST rules.
const NZ_TZ: chrono_tz::Tz = chrono_tz::Pacific::Auckland;

/// Transform a single race payload. `current_time` is the polling instant
/// used for time-to-start math; `previous_amounts` supplies the prior
/// pool amounts needed for incremental deltas.
pub fn transform_race(
    raw: &RawRaceData,
    current_time: DateTime<Utc>,
    previous_amounts: &PreviousAmounts,
) -> TransformedRace {
    let filter = Country::from_code(&raw.country).zip(RaceType::from_category(&raw.category));

    let Some((country, race_type)) = filter else {
        return TransformedRace::default();
    };

    let meeting = build_meeting(raw, country, race_type);
    let race = build_race(raw, current_time);

    let (entrants, money_flow_records, odds_records, race_pool) = if race.is_some() {
        build_entrant_rows(raw, current_time, previous_amounts)
    } else {
        (Vec::new(), Vec::new(), Vec::new(), None)
    };

    TransformedRace {
        meeting,
        race,
        entrants,
        race_pool,
        money_flow_records,
        odds_records,
    }
}

fn build_meeting(raw: &RawRaceData, country: Country, race_type: RaceType) -> Option<Meeting> {
    let date = raw
        .start_time
        .map(|t| t.with_timezone(&NZ_TZ).date_naive())
        .unwrap_or_else(|| Utc::now().with_timezone(&NZ_TZ).date_naive());

    Some(Meeting {
        meeting_id: raw.meeting_id.clone(),
        meeting_name: raw.meeting_name.clone(),
        country,
        race_type,
        date,
        track_condition: raw.track_condition.clone(),
        tote_status: raw.tote_status.clone(),
        status: MeetingStatus::Active,
    })
}

fn build_race(raw: &RawRaceData, current_time: DateTime<Utc>) -> Option<Race> {
    let start_time = raw.start_time?;
    let start_time_nz = start_time.with_timezone(&NZ_TZ).fixed_offset();
    let _ = current_time;

    Some(Race {
        race_id: raw.race_id.clone(),
        meeting_id: raw.meeting_id.clone(),
        name: raw.race_name.clone(),
        race_number: raw.race_number,
        start_time,
        race_date_nz: start_time_nz.date_naive(),
        start_time_nz,
        status: RaceStatus::from_upstream(&raw.status),
        actual_start: raw.actual_start,
    })
}

fn build_entrant_rows(
    raw: &RawRaceData,
    current_time: DateTime<Utc>,
    previous_amounts: &PreviousAmounts,
) -> (Vec<Entrant>, Vec<MoneyFlowHistory>, Vec<OddsHistory>, Option<RacePool>) {
    let race_pool = raw.race_pools.as_ref().map(|p| build_race_pool(raw, p, current_time));

    let (win_total_dollars, place_total_dollars) = raw
        .race_pools
        .as_ref()
        .map(|p| (p.win_pool_total, p.place_pool_total))
        .unwrap_or((0.0, 0.0));

    let start_time = raw.start_time;
    let minutes_to_start = start_time.map(|t| minutes_between(current_time, t));

    let mut entrants = Vec::with_capacity(raw.entrants.len());
    let mut money_flow = Vec::new();
    let mut odds = Vec::new();

    for raw_entrant in &raw.entrants {
        let PoolAmounts { win_cents, place_cents, .. } =
            derive_pool_amounts(raw_entrant.hold_percentage, win_total_dollars, place_total_dollars);
        let (win_pct, place_pct) =
            derive_pool_shares(win_cents, place_cents, win_total_dollars, place_total_dollars);

        let entrant = Entrant {
            entrant_id: raw_entrant.entrant_id.clone(),
            race_id: raw.race_id.clone(),
            name: raw_entrant.name.clone(),
            runner_number: raw_entrant.runner_number,
            barrier: raw_entrant.barrier,
            is_scratched: raw_entrant.is_scratched,
            is_late_scratched: raw_entrant.is_late_scratched,
            fixed_win_odds: raw_entrant.fixed_win_odds,
            fixed_place_odds: raw_entrant.fixed_place_odds,
            pool_win_odds: raw_entrant.pool_win_odds,
            pool_place_odds: raw_entrant.pool_place_odds,
            hold_percentage: raw_entrant.hold_percentage,
            bet_percentage: raw_entrant.bet_percentage,
            win_pool_percentage: win_pct,
            place_pool_percentage: place_pct,
            win_pool_amount: win_cents,
            place_pool_amount: place_cents,
            jockey: raw_entrant.jockey.clone(),
            trainer_name: raw_entrant.trainer_name.clone(),
            silk_colours: raw_entrant.silk_colours.clone(),
            favourite: raw_entrant.favourite,
            mover: raw_entrant.mover,
        };

        if let Some(t) = minutes_to_start {
            let previous = previous_amounts.get(&raw_entrant.entrant_id);
            let incremental_win = incremental_delta(win_cents, previous.map(|(w, _)| *w));
            let incremental_place = incremental_delta(place_cents, previous.map(|(_, p)| *p));

            let bucket = bucket_time_to_start(t);
            let interval_type = interval_type_for(t);

            money_flow.push(MoneyFlowHistory {
                entrant_id: raw_entrant.entrant_id.clone(),
                race_id: raw.race_id.clone(),
                time_to_start: t,
                time_interval: bucket,
                interval_type,
                polling_timestamp: current_time,
                win_pool_percentage: win_pct,
                place_pool_percentage: place_pct,
                win_pool_amount: win_cents,
                place_pool_amount: place_cents,
                incremental_win_amount: incremental_win,
                incremental_place_amount: incremental_place,
                fixed_win_odds: raw_entrant.fixed_win_odds,
                fixed_place_odds: raw_entrant.fixed_place_odds,
                pool_win_odds: raw_entrant.pool_win_odds,
                pool_place_odds: raw_entrant.pool_place_odds,
                event_timestamp: current_time,
            });

            for (value, odds_type) in [
                (raw_entrant.pool_win_odds, OddsType::PoolWin),
                (raw_entrant.pool_place_odds, OddsType::PoolPlace),
                (raw_entrant.fixed_win_odds, OddsType::FixedWin),
                (raw_entrant.fixed_place_odds, OddsType::FixedPlace),
            ] {
                if let Some(value) = value {
                    odds.push(OddsHistory {
                        entrant_id: raw_entrant.entrant_id.clone(),
                        odds: value,
                        odds_type,
                        event_timestamp: current_time,
                    });
                }
            }
        }

        entrants.push(entrant);
    }

    (entrants, money_flow, odds, race_pool)
}

fn build_race_pool(
    raw: &RawRaceData,
    pools: &crate::models::RawRacePools,
    current_time: DateTime<Utc>,
) -> RacePool {
    let win = dollars_to_cents(pools.win_pool_total);
    let place = dollars_to_cents(pools.place_pool_total);
    let quinella = dollars_to_cents(pools.quinella_pool_total);
    let trifecta = dollars_to_cents(pools.trifecta_pool_total);
    let exacta = dollars_to_cents(pools.exacta_pool_total);
    let first4 = dollars_to_cents(pools.first4_pool_total);

    RacePool {
        race_id: raw.race_id.clone(),
        win_pool_total: win,
        place_pool_total: place,
        quinella_pool_total: quinella,
        trifecta_pool_total: trifecta,
        exacta_pool_total: exacta,
        first4_pool_total: first4,
        total_race_pool: win + place + quinella + trifecta + exacta + first4,
        currency: pools.currency.clone().unwrap_or_else(|| "NZD".to_string()),
        last_updated: current_time,
    }
}

struct PoolAmounts {
    win_cents: Option<i64>,
    place_cents: Option<i64>,
    #[allow(dead_code)]
    total_cents: Option<i64>,
}

/// Pool-amount derivation per spec §4.2:
/// `win_pool_amount = round(W * (h/100) * 100)` cents, symmetric for place.
fn derive_pool_amounts(hold_percentage: Option<f64>, win_dollars: f64, place_dollars: f64) -> PoolAmounts {
    match hold_percentage {
        Some(h) => {
            let win_cents = (win_dollars * (h / 100.0) * 100.0).round() as i64;
            let place_cents = (place_dollars * (h / 100.0) * 100.0).round() as i64;
            let total_cents = ((win_dollars + place_dollars) * (h / 100.0) * 100.0).round() as i64;
            PoolAmounts { win_cents: Some(win_cents), place_cents: Some(place_cents), total_cents: Some(total_cents) }
        }
        None => PoolAmounts { win_cents: None, place_cents: None, total_cents: None },
    }
}

/// Pool share per spec §4.2: `(amount / (Total*100)) * 100`, null when the
/// pool total is not yet known or zero.
fn derive_pool_shares(
    win_cents: Option<i64>,
    place_cents: Option<i64>,
    win_dollars: f64,
    place_dollars: f64,
) -> (Option<f64>, Option<f64>) {
    let win_pct = match win_cents {
        Some(amount) if win_dollars > 0.0 => Some((amount as f64 / (win_dollars * 100.0)) * 100.0),
        _ => None,
    };
    let place_pct = match place_cents {
        Some(amount) if place_dollars > 0.0 => Some((amount as f64 / (place_dollars * 100.0)) * 100.0),
        _ => None,
    };
    (win_pct, place_pct)
}

/// Incremental delta per spec §4.2: current minus previous, or current
/// when no previous bucket exists.
fn incremental_delta(current: Option<i64>, previous: Option<i64>) -> i64 {
    let current = current.unwrap_or(0);
    match previous {
        Some(prev) => current - prev,
        None => current,
    }
}

fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

fn minutes_between(now: DateTime<Utc>, start: DateTime<Utc>) -> f64 {
    (start - now).num_milliseconds() as f64 / 60_000.0
}

/// Time bucketing per spec §4.2.
///
/// Pre-start: snap down to the nearest of {60,55,...,5,4,3,2,1,0}.
/// Post-start: snap up (toward zero) to {-0.5,-1,...,-5}, then integer
/// minutes `ceil(t)` for `t < -5`.
pub fn bucket_time_to_start(t: f64) -> f64 {
    if t >= 5.0 {
        (t / 5.0).floor() * 5.0
    } else if t >= 0.0 {
        t.floor()
    } else if t >= -5.0 {
        (t / 0.5).floor() * 0.5
    } else {
        t.ceil()
    }
}

/// Interval type per spec §4.2, reconciled with the `interval_type == live
/// ⇔ time_to_start < 0` invariant of spec §3/§8: the boundary at `t == 0`
/// is resolved in favor of the quantified invariant (stated twice, as both
/// a data invariant and a testable property) over §4.2's inclusive `t <= 0`
/// wording, so `t == 0` falls in the 30s tier rather than live.
pub fn interval_type_for(t: f64) -> IntervalType {
    if t > 30.0 {
        IntervalType::FiveMinute
    } else if t > 5.0 {
        IntervalType::TwoMinute
    } else if t >= 0.0 {
        IntervalType::ThirtySecond
    } else {
        IntervalType::Live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawEntrant as RE, RawRacePools};
    use chrono::TimeZone;

    fn sample_raw(hold: &[f64]) -> RawRaceData {
        RawRaceData {
            race_id: "r1".into(),
            meeting_id: "m1".into(),
            meeting_name: "Riccarton Park".into(),
            country: "NZ".into(),
            category: "Thoroughbred".into(),
            race_name: "Race 1".into(),
            race_number: 1,
            start_time: Some(Utc.with_ymd_and_hms(2026, 7, 28, 4, 0, 0).unwrap()),
            actual_start: None,
            status: "open".into(),
            track_condition: None,
            tote_status: None,
            entrants: hold
                .iter()
                .enumerate()
                .map(|(i, h)| RE {
                    entrant_id: format!("e{i}"),
                    name: format!("Runner {i}"),
                    runner_number: i as i32 + 1,
                    hold_percentage: Some(*h),
                    ..Default::default()
                })
                .collect(),
            race_pools: Some(RawRacePools {
                win_pool_total: 50_000.0,
                place_pool_total: 30_000.0,
                quinella_pool_total: 0.0,
                trifecta_pool_total: 0.0,
                exacta_pool_total: 0.0,
                first4_pool_total: 0.0,
                currency: Some("NZD".to_string()),
            }),
        }
    }

    #[test]
    fn happy_path_pool_amounts() {
        let raw = sample_raw(&[15.0]);
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 3, 0, 0).unwrap();
        let out = transform_race(&raw, now, &PreviousAmounts::new());

        let entrant = &out.entrants[0];
        assert_eq!(entrant.win_pool_amount, Some(750_000));
        assert_eq!(entrant.place_pool_amount, Some(450_000));

        let pool = out.race_pool.unwrap();
        assert_eq!(pool.total_race_pool, 8_000_000);
    }

    #[test]
    fn pool_share_null_when_total_zero() {
        let mut raw = sample_raw(&[15.0]);
        raw.race_pools.as_mut().unwrap().win_pool_total = 0.0;
        let out = transform_race(&raw, Utc::now(), &PreviousAmounts::new());
        assert_eq!(out.entrants[0].win_pool_percentage, None);
    }

    #[test]
    fn incremental_uses_current_when_no_previous() {
        let raw = sample_raw(&[10.0]);
        let out = transform_race(&raw, Utc::now(), &PreviousAmounts::new());
        let mf = &out.money_flow_records[0];
        assert_eq!(mf.incremental_win_amount, mf.win_pool_amount.unwrap());
    }

    #[test]
    fn incremental_is_delta_against_previous() {
        let raw = sample_raw(&[10.0]);
        let mut prev = PreviousAmounts::new();
        prev.insert("e0".to_string(), (400_000, 200_000));
        let out = transform_race(&raw, Utc::now(), &prev);
        let mf = &out.money_flow_records[0];
        assert_eq!(mf.incremental_win_amount, mf.win_pool_amount.unwrap() - 400_000);
        assert_eq!(mf.incremental_place_amount, mf.place_pool_amount.unwrap() - 200_000);
    }

    #[test]
    fn determinism_transform_twice_is_identical() {
        let raw = sample_raw(&[15.0, 10.0, 5.0]);
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 3, 30, 0).unwrap();
        let a = transform_race(&raw, now, &PreviousAmounts::new());
        let b = transform_race(&raw, now, &PreviousAmounts::new());
        assert_eq!(a, b);
    }

    #[test]
    fn greyhound_category_filtered_out() {
        let mut raw = sample_raw(&[10.0]);
        raw.category = "Greyhound".into();
        let out = transform_race(&raw, Utc::now(), &PreviousAmounts::new());
        assert!(out.meeting.is_none());
        assert!(out.race.is_none());
    }

    #[test]
    fn bucket_boundaries_match_spec_examples() {
        assert_eq!(bucket_time_to_start(20.0), 20.0);
        assert_eq!(bucket_time_to_start(19.9), 15.0);
        assert_eq!(bucket_time_to_start(-0.3), -0.5);
        assert_eq!(bucket_time_to_start(-7.0), -7.0);
    }

    #[test]
    fn interval_type_boundaries() {
        assert_eq!(interval_type_for(31.0), IntervalType::FiveMinute);
        assert_eq!(interval_type_for(30.0), IntervalType::TwoMinute);
        assert_eq!(interval_type_for(5.0), IntervalType::ThirtySecond);
        assert_eq!(interval_type_for(0.0), IntervalType::ThirtySecond);
        assert_eq!(interval_type_for(-5.0), IntervalType::Live);
    }

    #[test]
    fn interval_type_matches_live_iff_negative_or_zero_time_to_start() {
        for t in [-10.0, -0.1, 0.0, 0.5, 5.0, 5.1, 30.0, 30.1, 100.0] {
            let it = interval_type_for(t);
            assert_eq!(it == IntervalType::Live, t <= 0.0, "t={t} => {it:?}");
        }
    }
}
