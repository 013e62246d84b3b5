//! Read API (C14, spec §6.2): a thin `axum` router over the persisted
//! state. Handlers parse query params, run a read-only query, and map
//! `sqlx::Error` to the JSON error envelope.
//!
//! Grounded on the teacher's health router (`Router::new().route(...).with_state(...)`,
//! `axum::serve` over a `TcpListener`), extended with the meetings/races/entrants
//! routes this domain needs.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;

#[derive(Clone)]
pub struct ApiState {
    pub db: PgPool,
}

pub fn router(db: PgPool) -> Router {
    let state = Arc::new(ApiState { db });
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/meetings", get(meetings_handler))
        .route("/api/races", get(races_handler))
        .route("/api/entrants", get(entrants_handler))
        .with_state(state)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(err: sqlx::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("internal error: {err}") }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    deep: bool,
}

/// `GET /health` (spec §6.2): shallow by default, probes the database when
/// `?deep=true`.
async fn health_handler(State(state): State<Arc<ApiState>>, Query(query): Query<HealthQuery>) -> Response {
    if !query.deep {
        return Json(HealthResponse { status: "healthy", timestamp: chrono::Utc::now(), database: None }).into_response();
    }

    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => {
            Json(HealthResponse { status: "healthy", timestamp: chrono::Utc::now(), database: Some("reachable") })
                .into_response()
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "unhealthy", timestamp: chrono::Utc::now(), database: Some("unreachable") }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct MeetingRow {
    meeting_id: String,
    meeting_name: String,
    country: String,
    race_type: String,
    date: NaiveDate,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MeetingsQuery {
    date: Option<NaiveDate>,
    #[serde(rename = "raceType")]
    race_type: Option<String>,
}

/// `GET /api/meetings?date=YYYY-MM-DD&raceType=...` (spec §6.2).
async fn meetings_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MeetingsQuery>,
) -> Result<Json<Vec<MeetingRow>>, ApiError> {
    let date = query.date.ok_or_else(|| ApiError::bad_request("date is required"))?;

    let rows = sqlx::query_as::<_, MeetingRow>(
        r#"
        SELECT meeting_id, meeting_name, country, race_type, date, status
        FROM meetings
        WHERE date = $1 AND ($2::text IS NULL OR race_type = $2)
        ORDER BY meeting_name
        "#,
    )
    .bind(date)
    .bind(query.race_type)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct RaceRow {
    race_id: String,
    name: String,
    race_number: i32,
    #[sqlx(try_from = "chrono::DateTime<chrono::Utc>")]
    start_time: RaceStartTime,
    status: String,
    meeting_id: String,
}

/// Wraps `start_time` so it serializes with the Pacific/Auckland offset,
/// never the `Z`-suffixed UTC form the spec forbids (§6.2).
#[derive(Debug)]
struct RaceStartTime(chrono::DateTime<chrono::FixedOffset>);

impl TryFrom<chrono::DateTime<chrono::Utc>> for RaceStartTime {
    type Error = std::convert::Infallible;

    fn try_from(value: chrono::DateTime<chrono::Utc>) -> Result<Self, Self::Error> {
        const NZ_TZ: chrono_tz::Tz = chrono_tz::Pacific::Auckland;
        Ok(RaceStartTime(value.with_timezone(&NZ_TZ).fixed_offset()))
    }
}

impl Serialize for RaceStartTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

#[derive(Debug, Deserialize)]
struct RacesQuery {
    #[serde(rename = "meetingId")]
    meeting_id: Option<String>,
}

/// `GET /api/races?meetingId=...` (spec §6.2).
async fn races_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RacesQuery>,
) -> Result<Json<Vec<RaceRow>>, ApiError> {
    let meeting_id = query.meeting_id.ok_or_else(|| ApiError::bad_request("meetingId is required"))?;

    let rows = sqlx::query_as::<_, RaceRow>(
        r#"
        SELECT race_id, name, race_number, start_time, status, meeting_id
        FROM races
        WHERE meeting_id = $1
        ORDER BY race_number
        "#,
    )
    .bind(&meeting_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct EntrantRow {
    entrant_id: String,
    race_id: String,
    name: String,
    runner_number: i32,
    is_scratched: bool,
}

#[derive(Debug, Serialize)]
struct EntrantWithHistory {
    #[serde(flatten)]
    entrant: EntrantRow,
    odds_history: Vec<OddsHistoryRow>,
    money_flow_history: Vec<MoneyFlowHistoryRow>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct OddsHistoryRow {
    odds: f64,
    #[sqlx(rename = "type")]
    odds_type: String,
    event_timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct MoneyFlowHistoryRow {
    time_to_start: f64,
    interval_type: String,
    win_pool_amount: Option<i64>,
    place_pool_amount: Option<i64>,
    incremental_win_amount: i64,
    incremental_place_amount: i64,
    event_timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct EntrantsQuery {
    #[serde(rename = "raceId")]
    race_id: Option<String>,
}

/// `GET /api/entrants?raceId=...` (spec §6.2): entrants with embedded
/// `odds_history[]`/`money_flow_history[]`.
async fn entrants_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EntrantsQuery>,
) -> Result<Json<Vec<EntrantWithHistory>>, ApiError> {
    let race_id = query.race_id.ok_or_else(|| ApiError::bad_request("raceId is required"))?;

    let entrants = sqlx::query_as::<_, EntrantRow>(
        "SELECT entrant_id, race_id, name, runner_number, is_scratched FROM entrants WHERE race_id = $1 ORDER BY runner_number",
    )
    .bind(&race_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::internal)?;

    let mut result = Vec::with_capacity(entrants.len());
    for entrant in entrants {
        let odds_history = sqlx::query_as::<_, OddsHistoryRow>(
            "SELECT odds, type, event_timestamp FROM odds_history WHERE entrant_id = $1 ORDER BY event_timestamp",
        )
        .bind(&entrant.entrant_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::internal)?;

        let money_flow_history = sqlx::query_as::<_, MoneyFlowHistoryRow>(
            r#"
            SELECT time_to_start, interval_type, win_pool_amount, place_pool_amount,
                   incremental_win_amount, incremental_place_amount, event_timestamp
            FROM money_flow_history
            WHERE entrant_id = $1
            ORDER BY event_timestamp
            "#,
        )
        .bind(&entrant.entrant_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::internal)?;

        result.push(EntrantWithHistory { entrant, odds_history, money_flow_history });
    }

    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn race_start_time_serializes_with_nz_offset_not_z() {
        let utc = chrono::Utc.with_ymd_and_hms(2026, 7, 28, 3, 0, 0).unwrap();
        let wrapped: RaceStartTime = utc.try_into().unwrap();
        let serialized = serde_json::to_string(&wrapped).unwrap();
        assert!(!serialized.contains('Z'), "serialized form must not be Z-suffixed: {serialized}");
        assert!(serialized.contains('+') || serialized.contains("12:00") || serialized.contains("13:00"));
    }
}
