//! Telemetry
//!
//! Sets up `tracing-subscriber` once per process. The level comes from the
//! config file unless `RUST_LOG` overrides it; debug builds print
//! human-readable lines, release builds emit JSON with the current span so
//! per-subject and per-call fields survive into log aggregation. Logs go to
//! stderr so `--json` command output on stdout stays parseable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for a configured level
///
/// Noisy dependency crates stay at `warn` unless the level asks for less.
pub fn filter_directive(log_level: &str) -> String {
    format!(
        "{level},vigil_engine={level},vigil={level},sqlx=warn,hyper=warn,reqwest=warn",
        level = log_level
    )
}

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
pub fn init_telemetry_with_level(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize with "info" before the config has been read
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
