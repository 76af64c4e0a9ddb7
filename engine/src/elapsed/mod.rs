//! Elapsed-time calculation
//!
//! Pure functions that turn a last check-in time, a current time and a
//! threshold into a staleness decision. Nothing here performs I/O.
//!
//! Timestamps are truncated to whole Unix seconds before subtracting, so
//! `elapsed(a, b) == -elapsed(b, a)` holds exactly. Negative results (clock
//! skew, or a check-in recorded "in the future") are surfaced unchanged and
//! never reported as stale.

use chrono::{DateTime, TimeZone, Utc};
use sdk::errors::EngineError;
use sdk::types::StalenessStatus;
use serde::Serialize;

/// Default staleness threshold in seconds
pub const DEFAULT_THRESHOLD_SECS: i64 = 3600;

/// Result of one calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Elapsed {
    pub elapsed_seconds: i64,
    pub status: StalenessStatus,
    pub metadata: ElapsedMetadata,
}

/// Inputs echoed back alongside the decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElapsedMetadata {
    pub last_check_in_at: DateTime<Utc>,
    pub current_time: DateTime<Utc>,
    pub threshold_seconds: i64,
    pub human_message: String,
}

impl Elapsed {
    pub fn is_stale(&self) -> bool {
        self.status == StalenessStatus::Stale
    }
}

/// Parse a timestamp in any accepted representation
///
/// Accepts RFC 3339 / ISO-8601 text with an offset (`2024-05-01T10:00:00Z`)
/// or an integer count of Unix seconds (`1714557600`).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidTimestamp("empty timestamp".to_string()));
    }

    if let Ok(secs) = trimmed.parse::<i64>() {
        return from_unix_seconds(secs);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidTimestamp(format!("'{}': {}", trimmed, e)))
}

/// Convert whole Unix seconds, rejecting values chrono cannot represent
pub fn from_unix_seconds(secs: i64) -> Result<DateTime<Utc>, EngineError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| EngineError::InvalidTimestamp(format!("{} is out of range", secs)))
}

/// Calculate staleness from two textual timestamps
///
/// # Errors
///
/// Returns `EngineError::InvalidTimestamp` if either input does not parse.
pub fn calculate(
    last_check_in: &str,
    current_time: &str,
    threshold_seconds: i64,
) -> Result<Elapsed, EngineError> {
    let last = parse_timestamp(last_check_in)?;
    let current = parse_timestamp(current_time)?;
    Ok(calculate_between(last, current, threshold_seconds))
}

/// Calculate staleness from already-parsed timestamps
pub fn calculate_between(
    last_check_in: DateTime<Utc>,
    current_time: DateTime<Utc>,
    threshold_seconds: i64,
) -> Elapsed {
    let elapsed_seconds = elapsed_seconds(last_check_in, current_time);
    let status = if elapsed_seconds > threshold_seconds {
        StalenessStatus::Stale
    } else {
        StalenessStatus::Ok
    };

    Elapsed {
        elapsed_seconds,
        status,
        metadata: ElapsedMetadata {
            last_check_in_at: last_check_in,
            current_time,
            threshold_seconds,
            human_message: human_message(elapsed_seconds, threshold_seconds, status),
        },
    }
}

/// Whole seconds from `from` to `to`
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    to.timestamp() - from.timestamp()
}

fn human_message(elapsed_seconds: i64, threshold_seconds: i64, status: StalenessStatus) -> String {
    if elapsed_seconds < 0 {
        return format!(
            "Last check-in is {} in the future; clocks may be skewed",
            format_duration(elapsed_seconds.unsigned_abs())
        );
    }

    let elapsed = format_duration(elapsed_seconds.unsigned_abs());
    let threshold = format_duration(threshold_seconds.unsigned_abs());
    match status {
        StalenessStatus::Stale => format!(
            "No check-in for {}, which is past the {} limit",
            elapsed, threshold
        ),
        StalenessStatus::Ok => format!("Checked in {} ago (limit {})", elapsed, threshold),
    }
}

/// Render seconds as `1d 2h 3m 4s`, omitting zero components
pub fn format_duration(total_secs: u64) -> String {
    if total_secs == 0 {
        return "0s".to_string();
    }

    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect::<Vec<_>>()
        .join(" ")
}
