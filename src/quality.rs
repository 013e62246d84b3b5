//! Data Quality Validator (C13, spec §4.9): a post-transform consistency
//! check producing a 0-100 score, independent of persistence so it can run
//! against a `TransformedRace` before or after `bulk_write` commits it.
//!
//! Grounded on the transform engine's own pure-function style
//! (`transform.rs`): no I/O, deterministic given the same input.

use crate::models::{IntervalType, TransformedRace};

const SUM_TOLERANCE_PCT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub is_valid: bool,
    pub quality_score: u8,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Score a transformed race per the spec §4.9 weighting table. Starts at
/// 100 and deducts points per failed check; never goes below 0.
pub fn assess(transformed: &TransformedRace) -> QualityReport {
    let mut deductions = 0i32;
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    check_pool_percentage_sum(
        transformed,
        |e| e.win_pool_percentage,
        "win",
        &mut deductions,
        &mut warnings,
    );
    check_pool_percentage_sum(
        transformed,
        |e| e.place_pool_percentage,
        "place",
        &mut deductions,
        &mut warnings,
    );

    match &transformed.race_pool {
        Some(pool) => {
            let any_positive = pool.win_pool_total > 0 || pool.place_pool_total > 0;
            let place_within_bound = pool.win_pool_total == 0 || pool.place_pool_total <= pool.win_pool_total * 3;
            if !any_positive || !place_within_bound {
                deductions += 15;
                warnings.push("race pool present but inconsistent (place > 3x win, or both zero)".to_string());
            }
        }
        None => {
            deductions += 15;
            warnings.push("race pool object missing".to_string());
        }
    }

    let entrant_count = transformed.entrants.len();
    if !(2..=30).contains(&entrant_count) {
        deductions += 15;
        warnings.push(format!("entrant count {entrant_count} outside expected range [2, 30]"));
    }

    if money_flow_invariants_violated(transformed) {
        deductions += 10;
        warnings.push("money-flow rows violate incremental-amount or live-interval invariants".to_string());
    }

    if transformed.meeting.is_none() {
        deductions += 5;
        warnings.push("meeting missing".to_string());
    }
    if transformed.entrants.is_empty() {
        deductions += 10;
        warnings.push("no entrants".to_string());
    }
    if transformed.money_flow_records.is_empty() {
        deductions += 10;
        warnings.push("no money-flow records".to_string());
    }
    if transformed.race_pool.is_none() {
        deductions += 10;
        warnings.push("no race pool".to_string());
    }

    let totally_empty = transformed.meeting.is_none() && transformed.race.is_none() && transformed.entrants.is_empty();
    if totally_empty {
        errors.push("transform produced no entities at all".to_string());
    }

    let quality_score = (100 - deductions).clamp(0, 100) as u8;

    QualityReport { is_valid: !totally_empty, quality_score, warnings, errors }
}

fn check_pool_percentage_sum(
    transformed: &TransformedRace,
    extract: impl Fn(&crate::models::Entrant) -> Option<f64>,
    label: &str,
    deductions: &mut i32,
    warnings: &mut Vec<String>,
) {
    let percentages: Vec<f64> = transformed.entrants.iter().filter_map(|e| extract(e)).collect();
    if percentages.is_empty() {
        return;
    }
    let sum: f64 = percentages.iter().sum();
    if (sum - 100.0).abs() > SUM_TOLERANCE_PCT {
        *deductions += 20;
        warnings.push(format!("{label}-pool percentages sum to {sum:.2}, outside 100% +/- {SUM_TOLERANCE_PCT}%"));
    }
}

fn money_flow_invariants_violated(transformed: &TransformedRace) -> bool {
    transformed.money_flow_records.iter().any(|row| {
        let win_exceeds = row.win_pool_amount.is_some_and(|total| row.incremental_win_amount.abs() > total.abs());
        let place_exceeds =
            row.place_pool_amount.is_some_and(|total| row.incremental_place_amount.abs() > total.abs());
        let live_mismatch = (row.interval_type == IntervalType::Live) != (row.time_to_start < 0.0);
        win_exceeds || place_exceeds || live_mismatch
    })
}

/// Score below 80 is a warning-level signal, not an ingestion failure
/// (spec §4.9 "Score below 80 is logged as a warning but does not fail
/// ingestion").
pub fn is_low_quality(report: &QualityReport) -> bool {
    report.quality_score < 80
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entrant, IntervalType, Meeting, MoneyFlowHistory, RacePool};
    use chrono::Utc;

    fn base_entrant(win_pct: Option<f64>, place_pct: Option<f64>) -> Entrant {
        Entrant {
            entrant_id: "e1".into(),
            race_id: "r1".into(),
            name: "Runner".into(),
            runner_number: 1,
            barrier: None,
            is_scratched: false,
            is_late_scratched: None,
            fixed_win_odds: None,
            fixed_place_odds: None,
            pool_win_odds: None,
            pool_place_odds: None,
            hold_percentage: None,
            bet_percentage: None,
            win_pool_percentage: win_pct,
            place_pool_percentage: place_pct,
            win_pool_amount: Some(1000),
            place_pool_amount: Some(500),
            jockey: None,
            trainer_name: None,
            silk_colours: None,
            favourite: None,
            mover: None,
        }
    }

    fn base_race_pool() -> RacePool {
        RacePool {
            race_id: "r1".into(),
            win_pool_total: 10_000,
            place_pool_total: 5_000,
            quinella_pool_total: 0,
            trifecta_pool_total: 0,
            exacta_pool_total: 0,
            first4_pool_total: 0,
            total_race_pool: 15_000,
            currency: "NZD".into(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn happy_path_scores_high() {
        let mut e1 = base_entrant(Some(60.0), Some(60.0));
        e1.entrant_id = "e1".into();
        let mut e2 = base_entrant(Some(40.0), Some(40.0));
        e2.entrant_id = "e2".into();

        let transformed = TransformedRace {
            meeting: Some(Meeting {
                meeting_id: "m1".into(),
                meeting_name: "Riccarton".into(),
                country: crate::models::Country::Nz,
                race_type: crate::models::RaceType::Thoroughbred,
                date: Utc::now().date_naive(),
                track_condition: None,
                tote_status: None,
                status: crate::models::MeetingStatus::Active,
            }),
            race: None,
            entrants: vec![e1, e2],
            race_pool: Some(base_race_pool()),
            money_flow_records: vec![MoneyFlowHistory {
                entrant_id: "e1".into(),
                race_id: "r1".into(),
                time_to_start: 10.0,
                time_interval: 10.0,
                interval_type: IntervalType::TwoMinute,
                polling_timestamp: Utc::now(),
                win_pool_percentage: Some(60.0),
                place_pool_percentage: Some(60.0),
                win_pool_amount: Some(1000),
                place_pool_amount: Some(500),
                incremental_win_amount: 100,
                incremental_place_amount: 50,
                fixed_win_odds: None,
                fixed_place_odds: None,
                pool_win_odds: None,
                pool_place_odds: None,
                event_timestamp: Utc::now(),
            }],
            odds_records: Vec::new(),
        };

        let report = assess(&transformed);
        assert!(report.is_valid);
        assert!(report.quality_score >= 95, "score was {}", report.quality_score);
    }

    #[test]
    fn missing_everything_is_invalid() {
        let report = assess(&TransformedRace::default());
        assert!(!report.is_valid);
        assert_eq!(report.quality_score, 0);
    }

    #[test]
    fn skewed_percentage_sum_deducts_20() {
        let e1 = base_entrant(Some(10.0), Some(10.0));
        let transformed =
            TransformedRace { entrants: vec![e1.clone(), e1], race_pool: Some(base_race_pool()), ..Default::default() };
        let report = assess(&transformed);
        assert!(report.warnings.iter().any(|w| w.contains("win-pool percentages")));
    }

    #[test]
    fn live_interval_mismatch_is_flagged() {
        let mf = MoneyFlowHistory {
            entrant_id: "e1".into(),
            race_id: "r1".into(),
            time_to_start: 5.0,
            time_interval: 5.0,
            interval_type: IntervalType::Live,
            polling_timestamp: Utc::now(),
            win_pool_percentage: None,
            place_pool_percentage: None,
            win_pool_amount: None,
            place_pool_amount: None,
            incremental_win_amount: 0,
            incremental_place_amount: 0,
            fixed_win_odds: None,
            fixed_place_odds: None,
            pool_win_odds: None,
            pool_place_odds: None,
            event_timestamp: Utc::now(),
        };
        assert!(money_flow_invariants_violated(&TransformedRace { money_flow_records: vec![mf], ..Default::default() }));
    }

    #[test]
    fn low_quality_threshold_matches_spec() {
        let report = QualityReport { quality_score: 79, ..Default::default() };
        assert!(is_low_quality(&report));
        let report = QualityReport { quality_score: 80, ..Default::default() };
        assert!(!is_low_quality(&report));
    }
}
