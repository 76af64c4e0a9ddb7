/// Check-in record persistence
///
/// Timestamps are stored as whole Unix seconds. Columns are read back via
/// `CAST(.. AS TEXT)` so a row still holding legacy ISO-8601 text goes
/// through the same parser as an integer row; a value that is neither
/// surfaces as `InvalidTimestamp` for that subject only.
use super::CheckInStore;
use crate::elapsed::parse_timestamp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::CheckInRecord;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

const SELECT_COLUMNS: &str = "SELECT subject_id, \
     CAST(last_checkin_at AS TEXT) AS last_checkin_at, \
     message, \
     CAST(ttl AS TEXT) AS ttl \
     FROM check_ins";

/// SQLite-backed `CheckInStore`
#[derive(Clone)]
pub struct SqliteCheckInStore {
    pool: SqlitePool,
}

impl SqliteCheckInStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM check_ins")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count check-ins")
    }

    /// Rewrite rows whose timestamps are ISO-8601 text as Unix seconds
    ///
    /// Rows that do not parse are left untouched.
    pub async fn normalize_legacy_timestamps(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT subject_id, last_checkin_at FROM check_ins WHERE typeof(last_checkin_at) = 'text'",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to scan for legacy timestamps")?;

        let mut converted = 0;
        for row in rows {
            let subject_id: String = row.get("subject_id");
            let raw: String = row.get("last_checkin_at");

            match parse_timestamp(&raw) {
                Ok(at) => {
                    sqlx::query("UPDATE check_ins SET last_checkin_at = ? WHERE subject_id = ?")
                        .bind(at.timestamp())
                        .bind(&subject_id)
                        .execute(&self.pool)
                        .await
                        .context("Failed to rewrite legacy timestamp")?;
                    converted += 1;
                }
                Err(e) => {
                    warn!(subject_id = %subject_id, "Leaving unparsable timestamp in place: {}", e);
                }
            }
        }

        Ok(converted)
    }
}

fn database_error(action: &str, e: sqlx::Error) -> EngineError {
    EngineError::Database(format!("{}: {}", action, e))
}

fn record_from_row(row: &SqliteRow) -> Result<CheckInRecord, EngineError> {
    let subject_id: String = row
        .try_get("subject_id")
        .map_err(|e| database_error("Failed to decode subject_id", e))?;
    let raw_at: Option<String> = row
        .try_get("last_checkin_at")
        .map_err(|e| database_error("Failed to decode last_checkin_at", e))?;
    let raw_ttl: Option<String> = row
        .try_get("ttl")
        .map_err(|e| database_error("Failed to decode ttl", e))?;

    let last_check_in_at = match raw_at {
        Some(raw) => parse_timestamp(&raw)?,
        None => {
            return Err(EngineError::InvalidTimestamp(format!(
                "missing last check-in for {}",
                subject_id
            )))
        }
    };
    let ttl = raw_ttl.as_deref().map(parse_timestamp).transpose()?;

    Ok(CheckInRecord {
        subject_id,
        last_check_in_at,
        message: row
            .try_get("message")
            .map_err(|e| database_error("Failed to decode message", e))?,
        ttl,
    })
}

#[async_trait]
impl CheckInStore for SqliteCheckInStore {
    async fn get(&self, subject_id: &str) -> Result<Option<CheckInRecord>, EngineError> {
        let row = sqlx::query(&format!("{} WHERE subject_id = ?", SELECT_COLUMNS))
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error("Failed to fetch check-in", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn put(&self, record: &CheckInRecord) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO check_ins (subject_id, last_checkin_at, message, ttl) VALUES (?, ?, ?, ?) \
             ON CONFLICT(subject_id) DO UPDATE SET \
             last_checkin_at = excluded.last_checkin_at, \
             message = excluded.message, \
             ttl = excluded.ttl",
        )
        .bind(&record.subject_id)
        .bind(record.last_check_in_at.timestamp())
        .bind(&record.message)
        .bind(record.ttl.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to store check-in", e))?;

        debug!(subject_id = %record.subject_id, "Stored check-in");
        Ok(())
    }

    async fn query_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckInRecord>, EngineError> {
        let rows = sqlx::query(&format!(
            "{} WHERE last_checkin_at BETWEEN ? AND ? ORDER BY last_checkin_at ASC",
            SELECT_COLUMNS
        ))
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to query check-ins", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping malformed check-in row: {}", e),
            }
        }
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, EngineError> {
        let result =
            sqlx::query("DELETE FROM check_ins WHERE ttl IS NOT NULL AND ttl <= ?")
                .bind(now.timestamp())
                .execute(&self.pool)
                .await
                .map_err(|e| database_error("Failed to purge check-ins", e))?;

        Ok(result.rows_affected())
    }
}
