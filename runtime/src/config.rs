//! Configuration management.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::retry::RetryPolicy;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollcallConfig {
    /// Backoff applied to check-in conflicts and transient store failures
    pub retry: RetryConfig,
    /// UTC offset (minutes) used to interpret locally entered schedules
    pub schedule_utc_offset_minutes: i32,
    /// Tracing filter directive for binaries
    pub log_filter: String,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    pub max_retries: usize,
    /// First backoff delay in milliseconds (default: 100)
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds (default: 5000)
    pub max_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub multiplier: f64,
}

impl Default for RollcallConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl RollcallConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            retry: RetryConfig {
                max_retries: parse_or(&lookup, "ROLLCALL_RETRY_MAX", 3),
                initial_delay_ms: parse_or(&lookup, "ROLLCALL_RETRY_INITIAL_MS", 100),
                max_delay_ms: parse_or(&lookup, "ROLLCALL_RETRY_MAX_MS", 5_000),
                multiplier: Some(parse_or(&lookup, "ROLLCALL_RETRY_MULTIPLIER", 2.0))
                    .filter(|m: &f64| m.is_finite() && *m >= 1.0)
                    .unwrap_or(2.0),
            },
            schedule_utc_offset_minutes: parse_or(
                &lookup,
                "ROLLCALL_SCHEDULE_UTC_OFFSET_MINUTES",
                0,
            ),
            log_filter: lookup("ROLLCALL_LOG")
                .unwrap_or_else(|| "info,rollcall_runtime=debug".to_string()),
        }
    }

    /// Offset for [`rollcall_core::types::parse_local_schedule`].
    ///
    /// Out-of-range values fall back to UTC.
    #[must_use]
    pub fn schedule_offset(&self) -> FixedOffset {
        self.schedule_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl RetryConfig {
    /// Build the retry policy, jitter enabled.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.max_retries)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .multiplier(self.multiplier)
            .jitter(true)
            .build()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
