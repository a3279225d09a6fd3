use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MEDIA_LIMIT, DEFAULT_TRACKING_DISTANCE_METERS,
    DEFAULT_TRACKING_INTERVAL_SECS,
};
use crate::error::{Error, Result};
use crate::platform::{Accuracy, ForegroundNotice, TaskPolicy};

fn default_state_file() -> PathBuf {
    PathBuf::from("guardian_state.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_interval_secs() -> u64 {
    DEFAULT_TRACKING_INTERVAL_SECS
}

fn default_distance_meters() -> f64 {
    DEFAULT_TRACKING_DISTANCE_METERS
}

fn default_notification_title() -> String {
    "Location sharing active".to_string()
}

fn default_notification_body() -> String {
    "Your location is being shared with your parent device".to_string()
}

fn default_media_limit() -> usize {
    DEFAULT_MEDIA_LIMIT
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_relay_port() -> u16 {
    3000
}

/// Client configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the backend relay (e.g., http://relay.local:3000)
    pub backend_url: String,
    /// Key-value store document holding the device identity (default: guardian_state.json)
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Capability fixture describing permissions, fixes, contacts and media
    pub fixture: Option<PathBuf>,
    /// Transport-level timeout for every backend request (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Background task policy (maps to [tracking] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Minimum seconds between firings (default: 60)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Minimum meters moved between firings (default: 50)
    #[serde(default = "default_distance_meters")]
    pub distance_meters: f64,
    #[serde(default = "default_notification_title")]
    pub notification_title: String,
    #[serde(default = "default_notification_body")]
    pub notification_body: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            distance_meters: default_distance_meters(),
            notification_title: default_notification_title(),
            notification_body: default_notification_body(),
        }
    }
}

impl TrackingConfig {
    pub fn task_policy(&self) -> TaskPolicy {
        TaskPolicy {
            accuracy: Accuracy::High,
            min_interval: Duration::from_secs(self.interval_secs),
            min_distance_meters: self.distance_meters,
            notice: ForegroundNotice {
                title: self.notification_title.clone(),
                body: self.notification_body.clone(),
            },
        }
    }
}

/// Sync and parent view limits (maps to [sync] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Most recent media items uploaded per sync (default: 1000)
    #[serde(default = "default_media_limit")]
    pub media_limit: usize,
    /// Location history samples fetched for a child (default: 50)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            media_limit: default_media_limit(),
            history_limit: default_history_limit(),
        }
    }
}

/// Reference relay settings (maps to [relay] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_port")]
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
        }
    }
}

impl AppConfig {
    /// Config with defaults for everything but the backend URL
    pub fn with_backend(backend_url: &str) -> Self {
        Self {
            backend_url: backend_url.to_string(),
            state_file: default_state_file(),
            fixture: None,
            request_timeout_secs: default_request_timeout_secs(),
            tracking: TrackingConfig::default(),
            sync: SyncSettings::default(),
            relay: RelayConfig::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        let url = url::Url::parse(&self.backend_url)
            .map_err(|e| format!("backend_url '{}' is not a valid URL: {}", self.backend_url, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!(
                "backend_url must use http or https, found '{}'",
                url.scheme()
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }
        if self.tracking.interval_secs == 0 {
            return Err("tracking.interval_secs must be greater than 0".to_string());
        }
        if self.tracking.distance_meters.is_nan() || self.tracking.distance_meters < 0.0 {
            return Err("tracking.distance_meters must not be negative".to_string());
        }
        if self.sync.media_limit == 0 {
            return Err("sync.media_limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Parse and validate a config document
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    config.validate().map_err(Error::Config)?;
    Ok(config)
}

/// Load the config file at `path`.
/// Relative `state_file` and `fixture` paths resolve against the config's directory.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut config = parse_config(&content)?;

    if let Some(dir) = path.parent() {
        if config.state_file.is_relative() {
            config.state_file = dir.join(&config.state_file);
        }
        if let Some(fixture) = config.fixture.take() {
            config.fixture = Some(if fixture.is_relative() {
                dir.join(fixture)
            } else {
                fixture
            });
        }
    }
    Ok(config)
}
