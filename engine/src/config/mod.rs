//! Configuration management
//!
//! This module handles loading, validation, and management of the Vigil configuration.
//! Configuration is stored in TOML format at ~/.vigil/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **store**: Check-in database location
//! - **monitor**: Staleness threshold, tick cadence, dispatch routing, retry policy
//! - **bus**: Event bus buffering and redelivery
//! - **channels**: Per-channel endpoints, destinations and timeouts
//! - **content**: Personalized content generation (optional)
//! - **agent**, **speech**, **voice**: Voice check-in collaborators
//! - **server**: Webhook listener
//!
//! # Secrets
//!
//! API tokens are never written to the file. Each section that talks to an
//! external service names an environment variable (`token_env`) holding the
//! token; it is read once when the client is built.
//!
//! # Examples
//!
//! ```no_run
//! use vigil_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Threshold: {}s", config.monitor.threshold_secs);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::{Channel, Preferences, Tone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// State store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Staleness monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Event bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Notification channels
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Personalized content generation
    #[serde(default)]
    pub content: ContentConfig,

    /// Conversational agent
    #[serde(default)]
    pub agent: AgentConfig,

    /// Speech-to-text and text-to-speech services
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Telephony and voice session settings
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Webhook server
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file; relative paths resolve against `core.data_dir`
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// How the monitor hands a stale subject to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Publish a `TimeForCheckin` event; subscribers fan out
    Bus,
    /// Call the fan-out dispatcher in-process
    Direct,
}

/// Staleness monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds of silence after which a subject is stale
    #[serde(default = "default_threshold_secs")]
    pub threshold_secs: i64,

    /// Seconds between scheduler ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Budget for one tick; unprocessed subjects are deferred
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,

    /// Subjects processed concurrently within one tick
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Subjects always checked on every tick
    #[serde(default)]
    pub subjects: Vec<String>,

    /// Also check subjects found by a range query on the store
    #[serde(default = "default_true")]
    pub scan_store: bool,

    /// How far back the range query looks, in seconds
    #[serde(default = "default_scan_lookback_secs")]
    pub scan_lookback_secs: i64,

    #[serde(default = "default_dispatch_mode")]
    pub dispatch_mode: DispatchMode,

    /// Dispatch directly when publishing to the bus fails
    #[serde(default = "default_true")]
    pub fallback_to_direct: bool,

    /// Retry policy for store reads
    #[serde(default)]
    pub retry: RetryConfig,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_secs: default_threshold_secs(),
            interval_secs: default_interval_secs(),
            tick_timeout_secs: default_tick_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            subjects: Vec::new(),
            scan_store: true,
            scan_lookback_secs: default_scan_lookback_secs(),
            dispatch_mode: default_dispatch_mode(),
            fallback_to_direct: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-subscriber queue capacity
    #[serde(default = "default_bus_buffer")]
    pub buffer_size: usize,

    /// How long a publish waits on a full subscriber queue
    #[serde(default = "default_bus_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Attempts made to deliver one event to a failing handler
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// How long shutdown waits for handlers to finish queued events
    #[serde(default = "default_bus_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl BusConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_bus_buffer(),
            send_timeout_ms: default_bus_send_timeout_ms(),
            max_delivery_attempts: default_max_delivery_attempts(),
            drain_timeout_ms: default_bus_drain_timeout_ms(),
        }
    }
}

/// Settings shared by every notification channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Provider endpoint URL
    #[serde(default)]
    pub endpoint: String,

    /// Phone number, address or chat channel to notify
    #[serde(default)]
    pub destination: String,

    /// Sender phone number or address, where the provider needs one
    #[serde(default)]
    pub from: String,

    /// Environment variable holding the provider token
    #[serde(default)]
    pub token_env: Option<String>,

    /// Per-delivery timeout in seconds
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

impl ChannelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the token from the environment, if one is configured
    pub fn token(&self) -> Option<String> {
        read_token(self.token_env.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub sms: ChannelConfig,

    #[serde(default)]
    pub voice: ChannelConfig,

    #[serde(default)]
    pub email: ChannelConfig,

    #[serde(default)]
    pub chat: ChannelConfig,
}

impl ChannelsConfig {
    /// Enabled channels in dispatch order
    pub fn enabled(&self) -> Vec<(Channel, &ChannelConfig)> {
        [
            (Channel::Sms, &self.sms),
            (Channel::Voice, &self.voice),
            (Channel::Email, &self.email),
            (Channel::Chat, &self.chat),
        ]
        .into_iter()
        .filter(|(_, cfg)| cfg.enabled)
        .collect()
    }
}

/// Personalized content generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI-compatible base URL
    #[serde(default = "default_content_base_url")]
    pub base_url: String,

    #[serde(default = "default_content_model")]
    pub model: String,

    #[serde(default)]
    pub token_env: Option<String>,

    #[serde(default = "default_content_timeout_secs")]
    pub timeout_secs: u64,

    /// Tone and urgency applied to notification wording
    #[serde(default = "default_preferences")]
    pub preferences: Preferences,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_content_base_url(),
            model: default_content_model(),
            token_env: None,
            timeout_secs: default_content_timeout_secs(),
            preferences: default_preferences(),
        }
    }
}

/// Conversational agent service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub agent_id: String,

    #[serde(default)]
    pub alias_id: String,

    #[serde(default)]
    pub token_env: Option<String>,

    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_agent_endpoint(),
            agent_id: String::new(),
            alias_id: String::new(),
            token_env: None,
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// Speech services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_stt_endpoint")]
    pub stt_endpoint: String,

    #[serde(default = "default_tts_endpoint")]
    pub tts_endpoint: String,

    #[serde(default = "default_language_code")]
    pub language_code: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,

    #[serde(default = "default_voice_profile")]
    pub voice_profile: String,

    #[serde(default)]
    pub token_env: Option<String>,

    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_endpoint: default_stt_endpoint(),
            tts_endpoint: default_tts_endpoint(),
            language_code: default_language_code(),
            sample_rate_hz: default_sample_rate(),
            voice_profile: default_voice_profile(),
            token_env: None,
            timeout_secs: default_speech_timeout_secs(),
        }
    }
}

/// Telephony and voice session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_telephony_endpoint")]
    pub telephony_endpoint: String,

    #[serde(default)]
    pub sip_media_app_id: String,

    #[serde(default)]
    pub token_env: Option<String>,

    /// Bytes per audio frame handed to speech-to-text
    #[serde(default = "default_frame_bytes")]
    pub frame_bytes: usize,

    /// Provider-level call duration limit
    #[serde(default = "default_max_call_secs")]
    pub max_call_secs: u64,

    /// Phone number to subject id
    #[serde(default)]
    pub subject_directory: HashMap<String, String>,
}

impl VoiceConfig {
    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_secs)
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            telephony_endpoint: default_telephony_endpoint(),
            sip_media_app_id: String::new(),
            token_env: None,
            frame_bytes: default_frame_bytes(),
            max_call_secs: default_max_call_secs(),
            subject_directory: HashMap::new(),
        }
    }
}

/// Webhook server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_bind_addr(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.vigil")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vigil.db")
}

fn default_threshold_secs() -> i64 {
    3600
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_tick_timeout_secs() -> u64 {
    5 * 60
}

fn default_max_concurrency() -> usize {
    8
}

fn default_scan_lookback_secs() -> i64 {
    30 * 24 * 3600
}

fn default_dispatch_mode() -> DispatchMode {
    DispatchMode::Bus
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_bus_buffer() -> usize {
    100
}

fn default_bus_send_timeout_ms() -> u64 {
    1_000
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_bus_drain_timeout_ms() -> u64 {
    10_000
}

fn default_channel_timeout_secs() -> u64 {
    10
}

fn default_content_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_content_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_content_timeout_secs() -> u64 {
    30
}

fn default_preferences() -> Preferences {
    Preferences::new(Tone::Serious)
}

fn default_agent_endpoint() -> String {
    "http://localhost:8700/agent".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    30
}

fn default_stt_endpoint() -> String {
    "http://localhost:8701/transcribe".to_string()
}

fn default_tts_endpoint() -> String {
    "http://localhost:8701/synthesize".to_string()
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_voice_profile() -> String {
    "Matthew".to_string()
}

fn default_speech_timeout_secs() -> u64 {
    20
}

fn default_telephony_endpoint() -> String {
    "http://localhost:8702/calls".to_string()
}

fn default_frame_bytes() -> usize {
    16_000
}

fn default_max_call_secs() -> u64 {
    10 * 60
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

/// Read a token from the named environment variable
pub(crate) fn read_token(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
        .filter(|value| !value.is_empty())
}

impl Config {
    /// Load configuration from the default location (~/.vigil/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.vigil/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".vigil").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            store: StoreConfig::default(),
            monitor: MonitorConfig::default(),
            bus: BusConfig::default(),
            channels: ChannelsConfig::default(),
            content: ContentConfig::default(),
            agent: AgentConfig::default(),
            speech: SpeechConfig::default(),
            voice: VoiceConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Absolute path of the check-in database
    pub fn db_path(&self) -> PathBuf {
        if self.store.db_path.is_absolute() {
            self.store.db_path.clone()
        } else {
            self.core.data_dir.join(&self.store.db_path)
        }
    }

    /// Validate and process configuration
    ///
    /// Expands ~ in paths, creates the data directory, and rejects values
    /// the monitor or dispatcher cannot run with.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.monitor.threshold_secs <= 0 {
            return Err(EngineError::Config(
                "monitor.threshold_secs must be positive".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0 || self.monitor.tick_timeout_secs == 0 {
            return Err(EngineError::Config(
                "monitor.interval_secs and monitor.tick_timeout_secs must be positive".to_string(),
            ));
        }
        if self.monitor.max_concurrency == 0 {
            return Err(EngineError::Config(
                "monitor.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.monitor.retry.max_attempts == 0 || self.bus.max_delivery_attempts == 0 {
            return Err(EngineError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.bus.buffer_size == 0 {
            return Err(EngineError::Config(
                "bus.buffer_size must be at least 1".to_string(),
            ));
        }
        if self.voice.frame_bytes == 0 {
            return Err(EngineError::Config(
                "voice.frame_bytes must be at least 1".to_string(),
            ));
        }

        for (channel, cfg) in self.channels.enabled() {
            if cfg.endpoint.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "channels.{} is enabled but has no endpoint",
                    channel
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.store.db_path = expand_path(&self.store.db_path)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
