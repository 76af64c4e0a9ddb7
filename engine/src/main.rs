// Vigil check-in monitor
// Main entry point for the vigil binary

use clap::Parser;
use vigil_engine::app::App;
use vigil_engine::cli::{Cli, Command};
use vigil_engine::config::Config;
use vigil_engine::daemon::DaemonManager;
use vigil_engine::handlers::{
    handle_calc, handle_check_in, handle_history, handle_purge, handle_status, handle_tick,
    OutputFormat,
};
use vigil_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::debug!(
        "Vigil v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Start => {
            let manager = DaemonManager::new(&config)?;
            manager.start()?;
            tracing::info!("Vigil daemon started (PID {})", std::process::id());

            let app = App::build(config).await?;
            manager.run(app).await?;
            Ok(())
        }

        Command::Stop => {
            DaemonManager::stop(&config).await?;
            println!("Vigil daemon stopped.");
            Ok(())
        }

        Command::Status => handle_status(&config, format).await,

        Command::Tick { subjects } => handle_tick(subjects, &config, format).await,

        Command::CheckIn {
            subject,
            message,
            ttl_hours,
        } => handle_check_in(subject, message, ttl_hours, &config, format).await,

        Command::History { from, to } => handle_history(from, to, &config, format).await,

        Command::Calc {
            last,
            current,
            threshold,
        } => handle_calc(&last, &current, threshold, &config, format),

        Command::Purge => handle_purge(&config, format).await,
    }
}
