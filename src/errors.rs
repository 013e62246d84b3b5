//! Typed error taxonomy shared across the ingestion engine (spec §7).
//!
//! Every error kind carries enough information for its caller to decide
//! whether to retry, and callers branch on `.retriable()` rather than on
//! string matching.

use thiserror::Error;

/// Failure fetching data from the upstream racing API (C3).
#[derive(Debug, Error)]
#[error("fetch failed (status={status_code:?}, retriable={retriable}): {message}")]
pub struct FetchError {
    pub message: String,
    pub status_code: Option<u16>,
    pub response_excerpt: Option<String>,
    pub retriable: bool,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            response_excerpt: None,
            retriable: true,
        }
    }

    pub fn status(status_code: u16, body: &str) -> Self {
        let retriable = status_code >= 500;
        Self {
            message: format!("upstream returned HTTP {status_code}"),
            status_code: Some(status_code),
            response_excerpt: Some(sanitize_excerpt(body)),
            retriable,
        }
    }

    pub fn validation(message: impl Into<String>, body: &str) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            response_excerpt: Some(sanitize_excerpt(body)),
            retriable: false,
        }
    }
}

/// Truncate to at most 512 chars, per spec §4.1, and strip newlines so log
/// lines stay single-line.
fn sanitize_excerpt(body: &str) -> String {
    let flattened: String = body.chars().map(|c| if c.is_control() { ' ' } else { c }).collect();
    flattened.chars().take(512).collect()
}

/// Payload failed schema validation (non-retriable, spec §7).
#[derive(Debug, Error)]
#[error("validation failed: {message}")]
pub struct ValidationError {
    pub message: String,
    pub excerpt: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), excerpt: None }
    }
}

/// Worker pool reported a failure transforming a race (C5).
#[derive(Debug, Error)]
#[error("transform failed: {message}")]
pub struct TransformError {
    pub message: String,
    pub retriable: bool,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), retriable: false }
    }
}

/// A time-series append targeted a partition that does not exist (C6/C7).
#[derive(Debug, Error)]
#[error("partition not found: {table}_{partition}")]
pub struct PartitionNotFoundError {
    pub table: String,
    pub partition: String,
}

impl PartitionNotFoundError {
    pub fn new(table: impl Into<String>, partition: impl Into<String>) -> Self {
        Self { table: table.into(), partition: partition.into() }
    }

    /// Retriable after a compensating create attempt, per spec §7.
    pub fn retriable(&self) -> bool {
        true
    }
}

/// DB failure during bulk write (C6).
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("database connection failure: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("deadlock detected: {0}")]
    Deadlock(#[source] sqlx::Error),
    #[error("foreign key or constraint violation: {0}")]
    Constraint(#[source] sqlx::Error),
    #[error("partition missing: {0}")]
    MissingPartition(#[from] PartitionNotFoundError),
    #[error("schema/validation failure: {0}")]
    Schema(#[from] ValidationError),
}

impl WriteError {
    pub fn retriable(&self) -> bool {
        match self {
            WriteError::Connection(_) | WriteError::Deadlock(_) => true,
            WriteError::MissingPartition(e) => e.retriable(),
            WriteError::Constraint(_) | WriteError::Schema(_) => false,
        }
    }

    /// Classify a raw `sqlx::Error` into the appropriate retriable/fatal
    /// variant, per the transient/fatal split in spec §4.4.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                match code.as_str() {
                    // Postgres: deadlock_detected
                    "40P01" => WriteError::Deadlock(err),
                    // serialization_failure, connection_exception classes
                    c if c.starts_with("08") || c == "40001" => WriteError::Connection(err),
                    // foreign_key_violation, not_null_violation, check_violation
                    c if c.starts_with("23") => WriteError::Constraint(err),
                    _ => WriteError::Constraint(err),
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                WriteError::Connection(err)
            }
            _ => WriteError::Constraint(err),
        }
    }
}

/// Raised against any in-flight work when a scheduler or pool is
/// shutting down.
#[derive(Debug, Error)]
#[error("shutdown in progress, request rejected")]
pub struct ShutdownError;

/// Errors that `processRace` (C8) can surface, unifying fetch/transform/write.
#[derive(Debug, Error)]
pub enum RaceProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl RaceProcessError {
    pub fn retriable(&self) -> bool {
        match self {
            RaceProcessError::Fetch(e) => e.retriable,
            RaceProcessError::Transform(e) => e.retriable,
            RaceProcessError::Write(e) => e.retriable(),
            RaceProcessError::Shutdown(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_retriable_iff_5xx() {
        assert!(FetchError::status(503, "oops").retriable);
        assert!(!FetchError::status(404, "not found").retriable);
    }

    #[test]
    fn excerpt_truncated_to_512_chars() {
        let body = "x".repeat(2000);
        let err = FetchError::status(400, &body);
        assert_eq!(err.response_excerpt.unwrap().len(), 512);
    }

    #[test]
    fn partition_not_found_is_retriable() {
        let e = PartitionNotFoundError::new("money_flow_history", "2026_07_28");
        assert!(e.retriable());
    }
}
