//! Command handlers for CLI operations
//!
//! - status: daemon state and store summary
//! - tick: run one staleness tick in-process
//! - check-in: record a check-in directly in the store
//! - history: list check-ins in a time range
//! - calc: the elapsed-time calculator on two timestamps
//! - purge: delete expired check-ins

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use crate::app::App;
use crate::config::{Config, DispatchMode};
use crate::daemon::DaemonManager;
use crate::db::{CheckInStore, Database};
use crate::elapsed::{calculate, parse_timestamp};
use crate::message_bus::CheckInRecorded;
use crate::monitor::{DispatchRoute, SubjectOutcome};
use crate::recorder::record_from_detail;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_store(config: &Config) -> Result<Database> {
    Database::new(&config.db_path())
        .await
        .context("Failed to open check-in store")
}

/// Show daemon status and how many check-ins are on record
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let status = DaemonManager::status(config)?;

    let database = open_store(config).await?;
    let records = database.check_ins().count().await?;
    database.close().await?;

    match format {
        OutputFormat::Text => {
            if status.is_running {
                println!("Vigil daemon is running (PID {})", status.pid.unwrap_or(0));
            } else {
                println!("Vigil daemon is not running.");
            }
            println!("Store:     {}", config.db_path().display());
            println!("Check-ins: {}", records);
            println!("Threshold: {}s", config.monitor.threshold_secs);
            println!(
                "Channels:  {}",
                config
                    .channels
                    .enabled()
                    .iter()
                    .map(|(channel, _)| channel.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "daemon": status,
                "store": config.db_path(),
                "checkIns": records,
                "thresholdSeconds": config.monitor.threshold_secs,
                "channels": config.channels.enabled().iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run one tick now, dispatching directly so results are known on return
pub async fn handle_tick(subjects: Vec<String>, config: &Config, format: OutputFormat) -> Result<()> {
    let mut config = config.clone();
    config.monitor.dispatch_mode = DispatchMode::Direct;

    let app = App::build(config).await?;
    let report = if subjects.is_empty() {
        app.monitor.tick().await
    } else {
        app.monitor.check_subjects_at(subjects, Utc::now()).await
    };
    app.shutdown().await?;

    match format {
        OutputFormat::Text => {
            if report.reports.is_empty() && report.deferred.is_empty() {
                println!("No subjects to check");
                return Ok(());
            }

            for entry in &report.reports {
                match &entry.outcome {
                    SubjectOutcome::NoRecord => {
                        println!("{:<24} OK (no check-in on record)", entry.subject_id)
                    }
                    SubjectOutcome::Ok { elapsed } => println!(
                        "{:<24} OK  {}",
                        entry.subject_id, elapsed.metadata.human_message
                    ),
                    SubjectOutcome::Dispatched { elapsed, route } => {
                        println!(
                            "{:<24} STALE  {}",
                            entry.subject_id, elapsed.metadata.human_message
                        );
                        if let DispatchRoute::Direct { summary } = route {
                            for outcome in &summary.outcomes {
                                match &outcome.error_detail {
                                    Some(detail) => {
                                        println!("    {:<6} failed: {}", outcome.channel.as_str(), detail)
                                    }
                                    None => println!("    {:<6} sent", outcome.channel.as_str()),
                                }
                            }
                        }
                    }
                    SubjectOutcome::Skipped { reason } => {
                        println!("{:<24} SKIPPED  {}", entry.subject_id, reason)
                    }
                    SubjectOutcome::Failed { error } => {
                        println!("{:<24} FAILED  {}", entry.subject_id, error)
                    }
                }
            }

            if !report.deferred.is_empty() {
                println!();
                println!("Deferred to next tick: {}", report.deferred.join(", "));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Record a check-in without going through the daemon
pub async fn handle_check_in(
    subject: String,
    message: Option<String>,
    ttl_hours: Option<i64>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    if ttl_hours.is_some_and(|h| h <= 0) {
        anyhow::bail!("--ttl-hours must be positive");
    }

    let detail = CheckInRecorded {
        subject_id: Some(subject),
        timestamp: None,
        message,
        ttl_hours,
    };
    let record = record_from_detail(&detail, Utc::now())?;

    let database = open_store(config).await?;
    database.check_ins().put(&record).await?;
    database.close().await?;

    match format {
        OutputFormat::Text => println!(
            "Recorded check-in for {} at {}",
            record.subject_id,
            record.last_check_in_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
    }

    Ok(())
}

/// List check-ins whose last check-in lies in `[from, to]`
pub async fn handle_history(
    from: Option<String>,
    to: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let now = Utc::now();
    let to = match to {
        Some(raw) => parse_timestamp(&raw)?,
        None => now,
    };
    let from = match from {
        Some(raw) => parse_timestamp(&raw)?,
        None => to - ChronoDuration::hours(24),
    };

    let database = open_store(config).await?;
    let records = database
        .check_ins()
        .query_by_time_range(from, to)
        .await
        .context("Failed to fetch check-in history")?;
    database.close().await?;

    match format {
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No check-ins between {} and {}", from, to);
                return Ok(());
            }

            println!("Check-ins ({} to {}):", from, to);
            println!();
            for record in &records {
                println!(
                    "{:<24} {}  {}",
                    record.subject_id,
                    record.last_check_in_at.format("%Y-%m-%d %H:%M:%S"),
                    record.message.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "from": from,
                "to": to,
                "checkIns": records,
                "count": records.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run the calculator on two timestamps
pub fn handle_calc(
    last: &str,
    current: &str,
    threshold: Option<i64>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let threshold = threshold.unwrap_or(config.monitor.threshold_secs);
    let result = calculate(last, current, threshold)?;

    match format {
        OutputFormat::Text => {
            println!("Elapsed:   {}s", result.elapsed_seconds);
            println!("Status:    {}", result.status);
            println!("Threshold: {}s", threshold);
            println!("{}", result.metadata.human_message);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(())
}

/// Delete check-ins whose ttl has passed
pub async fn handle_purge(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_store(config).await?;
    let purged = database.check_ins().purge_expired(Utc::now()).await?;
    database.close().await?;

    match format {
        OutputFormat::Text => println!("Purged {} expired check-in(s)", purged),
        OutputFormat::Json => println!("{}", json!({ "purged": purged })),
    }

    Ok(())
}
