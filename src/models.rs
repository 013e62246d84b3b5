//! Data model (spec §3): persisted entities, upstream wire shapes, and the
//! shared enums between them.
//!
//! Upstream payload structs (`Raw*`) accept both `snake_case` and
//! `camelCase` field names via serde `alias`, so that casing variance is
//! normalized exactly once, at deserialization, and never leaks past the
//! client boundary (Open Question resolution, spec §9).

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Racing codes the ingestion engine cares about; greyhounds are filtered
/// out at the upstream client boundary (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceType {
    Thoroughbred,
    Harness,
}

impl RaceType {
    pub fn from_category(category: &str) -> Option<Self> {
        match category.to_ascii_lowercase().as_str() {
            "thoroughbred" => Some(RaceType::Thoroughbred),
            "harness" => Some(RaceType::Harness),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceType::Thoroughbred => "thoroughbred",
            RaceType::Harness => "harness",
        }
    }
}

/// Countries the engine ingests; upstream data for other countries is
/// filtered out before it reaches the transform engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Country {
    Aus,
    Nz,
}

impl Country {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "AUS" | "AU" => Some(Country::Aus),
            "NZ" => Some(Country::Nz),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Country::Aus => "AUS",
            Country::Nz => "NZ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Active,
    Completed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Active => "active",
            MeetingStatus::Completed => "completed",
        }
    }
}

/// Race lifecycle status. Ordering here matches the monotonic ingestion
/// direction documented in spec §3 (open → closed → interim → final/abandoned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Open,
    Closed,
    Interim,
    Final,
    Abandoned,
}

impl RaceStatus {
    pub fn from_upstream(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "closed" => RaceStatus::Closed,
            "interim" => RaceStatus::Interim,
            "final" | "finalized" => RaceStatus::Final,
            "abandoned" => RaceStatus::Abandoned,
            _ => RaceStatus::Open,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Open => "open",
            RaceStatus::Closed => "closed",
            RaceStatus::Interim => "interim",
            RaceStatus::Final => "final",
            RaceStatus::Abandoned => "abandoned",
        }
    }

    /// Terminal set per the Open Question resolution in spec §9: the
    /// broader {final, abandoned, closed}, not the legacy FaaS poller's
    /// narrower `status != 'Final'` check.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaceStatus::Final | RaceStatus::Abandoned | RaceStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsType {
    PoolWin,
    PoolPlace,
    FixedWin,
    FixedPlace,
}

impl OddsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OddsType::PoolWin => "pool_win",
            OddsType::PoolPlace => "pool_place",
            OddsType::FixedWin => "fixed_win",
            OddsType::FixedPlace => "fixed_place",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    FiveMinute,
    TwoMinute,
    ThirtySecond,
    Live,
    Unknown,
}

impl IntervalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalType::FiveMinute => "5m",
            IntervalType::TwoMinute => "2m",
            IntervalType::ThirtySecond => "30s",
            IntervalType::Live => "live",
            IntervalType::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------
// Persisted entities (spec §3)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: Country,
    pub race_type: RaceType,
    pub date: NaiveDate,
    pub track_condition: Option<String>,
    pub tote_status: Option<String>,
    pub status: MeetingStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub race_id: String,
    pub meeting_id: String,
    pub name: String,
    pub race_number: i32,
    pub start_time: DateTime<Utc>,
    pub race_date_nz: NaiveDate,
    pub start_time_nz: DateTime<FixedOffset>,
    pub status: RaceStatus,
    pub actual_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entrant {
    pub entrant_id: String,
    pub race_id: String,
    pub name: String,
    pub runner_number: i32,
    pub barrier: Option<i32>,
    pub is_scratched: bool,
    pub is_late_scratched: Option<bool>,
    pub fixed_win_odds: Option<f64>,
    pub fixed_place_odds: Option<f64>,
    pub pool_win_odds: Option<f64>,
    pub pool_place_odds: Option<f64>,
    pub hold_percentage: Option<f64>,
    pub bet_percentage: Option<f64>,
    pub win_pool_percentage: Option<f64>,
    pub place_pool_percentage: Option<f64>,
    pub win_pool_amount: Option<i64>,
    pub place_pool_amount: Option<i64>,
    pub jockey: Option<String>,
    pub trainer_name: Option<String>,
    pub silk_colours: Option<String>,
    pub favourite: Option<bool>,
    pub mover: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacePool {
    pub race_id: String,
    pub win_pool_total: i64,
    pub place_pool_total: i64,
    pub quinella_pool_total: i64,
    pub trifecta_pool_total: i64,
    pub exacta_pool_total: i64,
    pub first4_pool_total: i64,
    pub total_race_pool: i64,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyFlowHistory {
    pub entrant_id: String,
    pub race_id: String,
    pub time_to_start: f64,
    pub time_interval: f64,
    pub interval_type: IntervalType,
    pub polling_timestamp: DateTime<Utc>,
    pub win_pool_percentage: Option<f64>,
    pub place_pool_percentage: Option<f64>,
    pub win_pool_amount: Option<i64>,
    pub place_pool_amount: Option<i64>,
    pub incremental_win_amount: i64,
    pub incremental_place_amount: i64,
    pub fixed_win_odds: Option<f64>,
    pub fixed_place_odds: Option<f64>,
    pub pool_win_odds: Option<f64>,
    pub pool_place_odds: Option<f64>,
    pub event_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsHistory {
    pub entrant_id: String,
    pub odds: f64,
    pub odds_type: OddsType,
    pub event_timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Upstream wire shapes (spec §6.1)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawMeeting {
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: String,
    pub category: String,
    pub date: String,
    #[serde(alias = "trackCondition")]
    pub track_condition: Option<String>,
    #[serde(alias = "toteStatus")]
    pub tote_status: Option<String>,
    #[serde(alias = "races")]
    pub races: Vec<RawRaceSummary>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawRaceSummary {
    pub race_id: String,
    pub race_number: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawRaceData {
    pub race_id: String,
    pub meeting_id: String,
    pub meeting_name: String,
    pub country: String,
    pub category: String,
    pub race_name: String,
    pub race_number: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub status: String,
    #[serde(alias = "trackCondition")]
    pub track_condition: Option<String>,
    #[serde(alias = "toteStatus")]
    pub tote_status: Option<String>,
    pub entrants: Vec<RawEntrant>,
    #[serde(alias = "racePools", alias = "pools")]
    pub race_pools: Option<RawRacePools>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawEntrant {
    pub entrant_id: String,
    pub name: String,
    pub runner_number: i32,
    pub barrier: Option<i32>,
    #[serde(alias = "isScratched")]
    pub is_scratched: bool,
    #[serde(alias = "isLateScratched")]
    pub is_late_scratched: Option<bool>,
    #[serde(alias = "fixedWinOdds")]
    pub fixed_win_odds: Option<f64>,
    #[serde(alias = "fixedPlaceOdds")]
    pub fixed_place_odds: Option<f64>,
    #[serde(alias = "poolWinOdds")]
    pub pool_win_odds: Option<f64>,
    #[serde(alias = "poolPlaceOdds")]
    pub pool_place_odds: Option<f64>,
    #[serde(alias = "holdPercentage")]
    pub hold_percentage: Option<f64>,
    #[serde(alias = "betPercentage")]
    pub bet_percentage: Option<f64>,
    pub jockey: Option<String>,
    #[serde(alias = "trainerName")]
    pub trainer_name: Option<String>,
    #[serde(alias = "silkColours")]
    pub silk_colours: Option<String>,
    pub favourite: Option<bool>,
    pub mover: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawRacePools {
    #[serde(alias = "winPoolTotal")]
    pub win_pool_total: f64,
    #[serde(alias = "placePoolTotal")]
    pub place_pool_total: f64,
    #[serde(alias = "quinellaPoolTotal")]
    pub quinella_pool_total: f64,
    #[serde(alias = "trifectaPoolTotal")]
    pub trifecta_pool_total: f64,
    #[serde(alias = "exactaPoolTotal")]
    pub exacta_pool_total: f64,
    #[serde(alias = "first4PoolTotal")]
    pub first4_pool_total: f64,
    pub currency: Option<String>,
}

/// The output of the transform engine (C4): normalized rows ready for the
/// bulk-write layer, plus the money-flow/odds-history records derived in
/// the same pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedRace {
    pub meeting: Option<Meeting>,
    pub race: Option<Race>,
    pub entrants: Vec<Entrant>,
    pub race_pool: Option<RacePool>,
    pub money_flow_records: Vec<MoneyFlowHistory>,
    pub odds_records: Vec<OddsHistory>,
}
