//! CLI interface for Vigil
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for controlling the Vigil daemon
//! and working with the check-in store directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil check-in monitor
///
/// Watches when subjects last checked in, notifies them across channels once
/// they go quiet for too long, and records check-ins made by voice call or
/// webhook.
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon (scheduler and webhook server) in the foreground
    Start,

    /// Stop the running daemon
    Stop,

    /// Show daemon status and store summary
    Status,

    /// Run one staleness tick now
    Tick {
        /// Subjects to check (default: configured subjects plus store scan)
        subjects: Vec<String>,
    },

    /// Record a check-in for a subject
    CheckIn {
        /// Subject identifier
        subject: String,

        /// Free-text note stored with the check-in
        #[arg(short, long)]
        message: Option<String>,

        /// Expire the record after this many hours
        #[arg(long, value_name = "HOURS")]
        ttl_hours: Option<i64>,
    },

    /// List check-ins whose last check-in falls in a time range
    History {
        /// Range start (Unix seconds or RFC 3339; default: 24 hours ago)
        #[arg(long)]
        from: Option<String>,

        /// Range end (Unix seconds or RFC 3339; default: now)
        #[arg(long)]
        to: Option<String>,
    },

    /// Compute elapsed time and staleness for two timestamps
    Calc {
        /// Last check-in (Unix seconds or RFC 3339)
        last: String,

        /// Current time (Unix seconds or RFC 3339)
        current: String,

        /// Staleness threshold in seconds (default: monitor.threshold_secs)
        #[arg(long)]
        threshold: Option<i64>,
    },

    /// Delete check-ins whose expiry has passed
    Purge,
}
