//! Upstream racing API client (C3, spec §4.1/§6.1).
//!
//! Grounded on the teacher's `fetch_events`/`fetch_event_h1_odds`: a
//! `reqwest::Client` built once with connect/request timeouts, a
//! `governor::RateLimiter` pacing requests, and a small retry loop rather
//! than a crate, since the backoff schedule (100/200/400ms, spec §4.1) is
//! fixed.

use std::num::NonZeroU32;
use std::time::Duration;

use chrono::NaiveDate;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::errors::FetchError;
use crate::models::{Country, RaceStatus, RaceType, RawMeeting, RawRaceData};

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SCHEDULE_MS: [u64; 2] = [100, 200];

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: DirectRateLimiter,
}

impl UpstreamClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
        requests_per_minute: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());

        Ok(Self { http, base_url, api_key, rate_limiter: RateLimiter::direct(quota) })
    }

    /// `fetchMeetingsForDate` (spec §4.1): all meetings for a racing date,
    /// filtered to AU/NZ thoroughbred/harness (greyhounds excluded).
    pub async fn fetch_meetings_for_date(&self, date: NaiveDate) -> Result<Vec<RawMeeting>, FetchError> {
        let url = format!("{}/affiliates/v1/racing/meetings", self.base_url);
        let query = [("date", date.format("%Y-%m-%d").to_string())];

        #[derive(serde::Deserialize)]
        struct Envelope {
            data: Data,
        }
        #[derive(serde::Deserialize)]
        struct Data {
            #[serde(default)]
            meetings: Vec<RawMeeting>,
        }

        let body = self.get_with_retry(&url, &query).await?;
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| FetchError::validation(format!("failed to parse meetings payload: {e}"), &body))?;

        let filtered: Vec<RawMeeting> = envelope
            .data
            .meetings
            .into_iter()
            .filter(|m| Country::from_code(&m.country).is_some() && RaceType::from_category(&m.category).is_some())
            .collect();

        info!(count = filtered.len(), "fetched meetings for date");
        Ok(filtered)
    }

    /// `fetchRaceData` (spec §4.1): full race event payload, with
    /// status-aware query parameters.
    pub async fn fetch_race_data(
        &self,
        race_id: &str,
        current_status: Option<RaceStatus>,
    ) -> Result<RawRaceData, FetchError> {
        let url = format!("{}/affiliates/v1/racing/events/{race_id}", self.base_url);
        let query = status_query_params(current_status);

        let body = self.get_with_retry(&url, &query).await?;
        let race: RawRaceData = serde_json::from_str(&body)
            .map_err(|e| FetchError::validation(format!("failed to parse race payload: {e}"), &body))?;

        Ok(race)
    }

    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;

            let mut request = self.http.get(url).header("Accept", "application/json").query(query);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let err = FetchError::network(e.to_string());
                    if attempt >= MAX_ATTEMPTS {
                        return Err(err);
                    }
                    self.backoff(attempt).await;
                    warn!(attempt, error = %e, "network error fetching upstream, retrying");
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.is_success() {
                return Ok(body);
            }

            if status.is_server_error() && attempt < MAX_ATTEMPTS {
                self.backoff(attempt).await;
                warn!(attempt, %status, "upstream 5xx, retrying");
                continue;
            }

            return Err(FetchError::status(status.as_u16(), &body));
        }
    }

    async fn backoff(&self, attempt: u32) {
        let idx = (attempt - 1) as usize;
        let ms = BACKOFF_SCHEDULE_MS.get(idx).copied().unwrap_or(400);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Status-aware query parameters, per spec §4.1:
/// - `open`/unknown: tote-trends, money-tracker, big-bets, live-bets, will-pays
/// - `interim`: results
/// - `closed`: results + dividends
fn status_query_params(status: Option<RaceStatus>) -> Vec<(&'static str, String)> {
    match status {
        Some(RaceStatus::Interim) => vec![("with_results", "true".to_string())],
        Some(RaceStatus::Closed) => {
            vec![("with_results", "true".to_string()), ("with_dividends", "true".to_string())]
        }
        _ => vec![
            ("with_tote_trends_data", "true".to_string()),
            ("with_money_tracker", "true".to_string()),
            ("with_big_bets", "true".to_string()),
            ("with_live_bets", "true".to_string()),
            ("with_will_pays", "true".to_string()),
        ],
    }
}

/// Returned from `reqwest` status codes that the retry loop never actually
/// constructs directly but which other modules may want to branch on.
pub fn is_retriable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: String) -> UpstreamClient {
        UpstreamClient::new(base_url, None, Duration::from_secs(5), Duration::from_secs(5), 6000).unwrap()
    }

    #[test]
    fn status_query_params_match_spec_table() {
        assert_eq!(status_query_params(Some(RaceStatus::Open)).len(), 5);
        assert_eq!(status_query_params(None).len(), 5);
        assert_eq!(status_query_params(Some(RaceStatus::Interim)), vec![("with_results", "true".to_string())]);
        assert_eq!(
            status_query_params(Some(RaceStatus::Closed)),
            vec![("with_results", "true".to_string()), ("with_dividends", "true".to_string())]
        );
    }

    #[tokio::test]
    async fn retries_twice_on_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/affiliates/v1/racing/events/r1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/affiliates/v1/racing/events/r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "race_id": "r1",
                "meeting_id": "m1",
                "country": "NZ",
                "category": "Thoroughbred",
                "race_name": "Race 1",
                "race_number": 1,
                "status": "open",
                "entrants": []
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let result = client.fetch_race_data("r1", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fails_fast_on_404_after_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/affiliates/v1/racing/events/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let err = client.fetch_race_data("missing", None).await.unwrap_err();
        assert!(!err.retriable);
        assert_eq!(err.status_code, Some(404));
    }

    #[tokio::test]
    async fn meetings_filtered_to_au_nz_horse_harness() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/affiliates/v1/racing/meetings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "meetings": [
                        {"meeting_id": "m1", "meeting_name": "Riccarton", "country": "NZ", "category": "Thoroughbred", "date": "2026-07-28"},
                        {"meeting_id": "m2", "meeting_name": "Sydney", "country": "AUS", "category": "Greyhound", "date": "2026-07-28"},
                        {"meeting_id": "m3", "meeting_name": "Meydan", "country": "UAE", "category": "Thoroughbred", "date": "2026-07-28"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let meetings = client.fetch_meetings_for_date(NaiveDate::from_ymd_opt(2026, 7, 28).unwrap()).await.unwrap();
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].meeting_id, "m1");
    }
}
