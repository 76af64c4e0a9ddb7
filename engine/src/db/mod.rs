/// Database module for SQLite persistence
///
/// Holds the check-in state store. Uses sqlx with WAL mode so the webhook
/// server, the scheduler and CLI invocations can read and write the same
/// file concurrently.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::CheckInRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub mod check_ins;

pub use check_ins::SqliteCheckInStore;

/// Durable per-subject check-in records
///
/// At most one record exists per subject; `put` overwrites. A missing record
/// is `Ok(None)`, never an error.
#[async_trait]
pub trait CheckInStore: Send + Sync {
    async fn get(&self, subject_id: &str) -> Result<Option<CheckInRecord>, EngineError>;

    async fn put(&self, record: &CheckInRecord) -> Result<(), EngineError>;

    /// Records whose last check-in lies in `[from, to]`, oldest first
    async fn query_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckInRecord>, EngineError>;

    /// Delete records whose ttl is at or before `now`; returns how many
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, EngineError>;
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and bring the schema up to date
    ///
    /// SQLite replays any WAL left behind by an unclean shutdown when the
    /// file is reopened. Legacy rows that stored ISO-8601 text timestamps
    /// are rewritten as Unix seconds after migrations run.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Initializing database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };

        db.run_migrations().await?;

        let converted = db.check_ins().normalize_legacy_timestamps().await?;
        if converted > 0 {
            warn!(converted, "Converted legacy ISO-8601 check-in timestamps");
        }

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::raw_sql(include_str!("../../migrations/001_check_ins.sql"))
            .execute(&self.pool)
            .await
            .context("Failed to execute migration 001_check_ins.sql")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> Result<()> {
        info!("Flushing WAL to disk");

        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed successfully");
        Ok(())
    }

    /// Flush the WAL and close every pooled connection
    pub async fn close(self) -> Result<()> {
        info!("Closing database connection");

        self.flush_wal().await?;
        self.pool.close().await;

        info!("Database connection closed");
        Ok(())
    }

    /// Create a check-in store sharing this pool
    pub fn check_ins(&self) -> SqliteCheckInStore {
        SqliteCheckInStore::new(self.pool.clone())
    }
}
