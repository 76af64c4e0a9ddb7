//! Integration tests for configuration management
//!
//! These tests verify that the Config struct can be properly loaded,
//! validated, and processed with path expansion and defaults.

use sdk::types::{Channel, Tone};
use std::fs;
use tempfile::TempDir;
use vigil_engine::config::{Config, DispatchMode};

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_config_toml_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let path = write_config(
        &temp_dir,
        &format!(
            r#"
[core]
log_level = "debug"
data_dir = "{}"

[monitor]
threshold_secs = 7200
interval_secs = 60
subjects = ["u-1", "u-2"]
dispatch_mode = "direct"

[monitor.retry]
max_attempts = 5

[channels.sms]
enabled = true
endpoint = "https://sms.example/send"
destination = "+15550100"

[channels.chat]
enabled = true
endpoint = "https://chat.example/api/chat.postMessage"
destination = "C123"
token_env = "VIGIL_TEST_CHAT_TOKEN"
timeout_secs = 3

[content]
enabled = false
preferences = {{ tone = "funny", urgency = "high" }}

[voice]
max_call_secs = 120

[voice.subject_directory]
"+15550100" = "u-1"

[server]
bind_addr = "127.0.0.1:0"
"#,
            data_dir.display()
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(data_dir.exists(), "data directory should be created");
    assert_eq!(config.monitor.threshold_secs, 7200);
    assert_eq!(config.monitor.interval_secs, 60);
    assert_eq!(config.monitor.subjects, vec!["u-1", "u-2"]);
    assert_eq!(config.monitor.dispatch_mode, DispatchMode::Direct);
    assert_eq!(config.monitor.retry.max_attempts, 5);
    assert_eq!(config.monitor.retry.initial_backoff_ms, 200);

    let enabled: Vec<Channel> = config.channels.enabled().into_iter().map(|(c, _)| c).collect();
    assert_eq!(enabled, vec![Channel::Sms, Channel::Chat]);
    assert_eq!(config.channels.chat.timeout_secs, 3);
    assert_eq!(config.channels.sms.timeout_secs, 10);

    assert_eq!(config.content.preferences.tone, Tone::Funny);
    assert_eq!(config.voice.max_call_duration().as_secs(), 120);
    assert_eq!(
        config.voice.subject_directory.get("+15550100").map(String::as_str),
        Some("u-1")
    );
    assert_eq!(config.db_path(), data_dir.join("vigil.db"));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::from_toml_str(&format!(
        "[core]\ndata_dir = \"{}\"\n",
        temp_dir.path().display()
    ))
    .unwrap();

    assert_eq!(config.core.log_level, "info");
    assert_eq!(config.monitor.threshold_secs, 3600);
    assert_eq!(config.monitor.dispatch_mode, DispatchMode::Bus);
    assert!(config.monitor.fallback_to_direct);
    assert!(config.monitor.scan_store);
    assert_eq!(config.bus.buffer_size, 100);
    assert!(config.server.enabled);
    assert!(!config.content.enabled);
    assert!(config.channels.enabled().is_empty());
}

#[test]
fn test_absolute_store_path_is_kept() {
    let temp_dir = TempDir::new().unwrap();
    let db_file = temp_dir.path().join("elsewhere").join("checkins.db");
    let config = Config::from_toml_str(&format!(
        "[core]\ndata_dir = \"{}\"\n\n[store]\ndb_path = \"{}\"\n",
        temp_dir.path().display(),
        db_file.display()
    ))
    .unwrap();

    assert_eq!(config.db_path(), db_file);
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let core = format!("[core]\ndata_dir = \"{}\"\n", temp_dir.path().display());

    let cases = [
        "[core]\nlog_level = \"loud\"\n".to_string(),
        format!("{core}\n[monitor]\nthreshold_secs = 0\n"),
        format!("{core}\n[monitor]\ninterval_secs = 0\n"),
        format!("{core}\n[monitor]\nmax_concurrency = 0\n"),
        format!("{core}\n[bus]\nmax_delivery_attempts = 0\n"),
        format!("{core}\n[voice]\nframe_bytes = 0\n"),
        format!("{core}\n[channels.email]\nenabled = true\ndestination = \"a@example.com\"\n"),
    ];

    for case in &cases {
        assert!(
            Config::from_toml_str(case).is_err(),
            "expected rejection for:\n{}",
            case
        );
    }
}

#[test]
fn test_missing_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let error = Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap_err();
    assert!(error.to_string().contains("Failed to read config file"));
}

#[test]
fn test_channel_token_comes_from_environment() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::from_toml_str(&format!(
        r#"
[core]
data_dir = "{}"

[channels.sms]
enabled = true
endpoint = "https://sms.example/send"
token_env = "VIGIL_TEST_SMS_TOKEN_UNSET"
"#,
        temp_dir.path().display()
    ))
    .unwrap();

    std::env::remove_var("VIGIL_TEST_SMS_TOKEN_UNSET");
    assert_eq!(config.channels.sms.token(), None);

    let serialized = toml::to_string(&config).unwrap();
    assert!(serialized.contains("VIGIL_TEST_SMS_TOKEN_UNSET"));
}
