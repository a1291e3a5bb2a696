// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Minimum lead time between "now" and a quiz start time when it is scheduled.
pub const MIN_SCHEDULE_LEAD_MINUTES: i64 = 5;

/// How long an original (non-reassigned) enrollment stays listed after the quiz starts.
pub const ENROLLMENT_VISIBILITY_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub rust_log: String,
    pub bind_addr: String,
    /// Zone used when a stored or submitted zone id is not recognised.
    pub default_timezone: String,
    /// Seconds between background sweeps; 0 disables the task.
    pub sweep_interval_secs: u64,
    /// Clamped to one week by `SweepPolicy::from_config`.
    pub sweep_absolute_ceiling_minutes: i64,
    /// Clamped to `1..=3650` by `SweepPolicy::from_config`.
    pub answer_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let default_timezone = env::var("DEFAULT_TIMEZONE")
            .unwrap_or_else(|_| "UTC".to_string());

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let sweep_absolute_ceiling_minutes = env::var("SWEEP_ABSOLUTE_CEILING_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(240);

        let answer_retention_days = env::var("ANSWER_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);

        Self {
            database_url,
            rust_log,
            bind_addr,
            default_timezone,
            sweep_interval_secs,
            sweep_absolute_ceiling_minutes,
            answer_retention_days,
        }
    }
}
