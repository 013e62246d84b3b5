//! Structured logging init (C1), mirroring the teacher's
//! `tracing_subscriber::fmt()` call in `main`, extended with a JSON layer
//! switch for production deployments.

use crate::config::LogFormat;

pub fn init(log_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .init();
        }
        LogFormat::Plain => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
