//! Validated environment configuration (C1, spec §6.3).
//!
//! Mirrors the teacher's `Config::from_env`: every required value is read
//! eagerly at startup and a placeholder/empty value fails fast rather than
//! surfacing as a confusing downstream error.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub upstream_base_url: String,
    pub upstream_api_key: Option<String>,
    pub nztab_api_url: String,
    pub database_url: String,

    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub is_production: bool,

    pub db_pool_max: u32,
    pub max_worker_threads: usize,
    pub worker_max_attempts: u32,

    pub evening_backfill_enabled: bool,
    pub evening_backfill_cron: Option<String>,
    pub scalar_key_batch_size: usize,

    pub upstream_requests_per_minute: u32,
    pub http_connect_timeout: Duration,
    pub http_request_timeout: Duration,

    pub race_budget_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let upstream_base_url = require_non_placeholder(
            "APPWRITE_ENDPOINT",
            env::var("APPWRITE_ENDPOINT").or_else(|_| env::var("UPSTREAM_BASE_URL")).ok(),
        )?;

        let upstream_api_key = match env::var("UPSTREAM_API_KEY").or_else(|_| env::var("APPWRITE_API_KEY")) {
            Ok(v) if !v.trim().is_empty() => Some(require_non_placeholder_value("UPSTREAM_API_KEY", v)?),
            _ => None,
        };

        let nztab_api_url = require_non_placeholder("NZTAB_API_URL", env::var("NZTAB_API_URL").ok())?;

        let database_url = Self::resolve_database_url()?;

        let port = parse_or_default("PORT", 7000);
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        let is_production = env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false);

        let db_pool_max = parse_or_default("DB_POOL_MAX", 10);
        let max_worker_threads = parse_or_default("MAX_WORKER_THREADS", 3);
        let worker_max_attempts = parse_or_default("WORKER_MAX_ATTEMPTS", 2);

        let evening_backfill_enabled = env::var("EVENING_BACKFILL_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let evening_backfill_cron = env::var("EVENING_BACKFILL_CRON").ok();
        let scalar_key_batch_size = parse_or_default::<usize>("SCALAR_KEY_BATCH_SIZE", 100).min(500);

        let upstream_requests_per_minute = parse_or_default("UPSTREAM_REQUESTS_PER_MINUTE", 60);

        Ok(Self {
            upstream_base_url,
            upstream_api_key,
            nztab_api_url,
            database_url,
            port,
            log_level,
            log_format,
            is_production,
            db_pool_max,
            max_worker_threads,
            worker_max_attempts,
            evening_backfill_enabled,
            evening_backfill_cron,
            scalar_key_batch_size,
            upstream_requests_per_minute,
            http_connect_timeout: Duration::from_secs(10),
            http_request_timeout: Duration::from_secs(15),
            race_budget_ms: 2000,
        })
    }

    fn resolve_database_url() -> Result<String> {
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                return Ok(url);
            }
        }

        let host = env::var("DB_HOST").context("DATABASE_URL or DB_HOST must be set")?;
        let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let user = env::var("DB_USER").context("DB_USER must be set when DATABASE_URL is absent")?;
        let password = env::var("DB_PASSWORD").context("DB_PASSWORD must be set when DATABASE_URL is absent")?;
        let name = env::var("DB_NAME").context("DB_NAME must be set when DATABASE_URL is absent")?;

        Ok(format!("postgresql://{user}:{password}@{host}:{port}/{name}"))
    }
}

fn parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn require_non_placeholder(key: &str, value: Option<String>) -> Result<String> {
    let value = value.ok_or_else(|| anyhow!("{key} must be set"))?;
    require_non_placeholder_value(key, value)
}

fn require_non_placeholder_value(key: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{key} is set but empty"));
    }
    let lower = trimmed.to_lowercase();
    if lower.contains("change_me") || lower.contains("your_") || lower.starts_with("sample") {
        return Err(anyhow!("{key} appears to be a placeholder value; replace with a real one"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_placeholder_values() {
        assert!(require_non_placeholder_value("KEY", "CHANGE_ME".to_string()).is_err());
        assert!(require_non_placeholder_value("KEY", "your_api_key".to_string()).is_err());
        assert!(require_non_placeholder_value("KEY", "sample-123".to_string()).is_err());
    }

    #[test]
    fn accepts_real_values() {
        assert_eq!(require_non_placeholder_value("KEY", " real-value-42 ".to_string()).unwrap(), "real-value-42");
    }

    #[test]
    fn scalar_key_batch_size_capped_at_500() {
        std::env::set_var("SCALAR_KEY_BATCH_SIZE", "9000");
        assert_eq!(parse_or_default::<usize>("SCALAR_KEY_BATCH_SIZE", 100).min(500), 500);
        std::env::remove_var("SCALAR_KEY_BATCH_SIZE");
    }
}
