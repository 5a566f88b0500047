//! Configuration management for Keyboard Dechatter
//!
//! The filter core only ever reads an immutable [`Config`] snapshot. This
//! module owns the on-disk format and the last-known-good handling used
//! when an update is missing or invalid.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/keyboard-dechatter/config.toml` |
//! | macOS | `~/Library/Application Support/keyboard-dechatter/config.toml` |
//! | Windows | `%APPDATA%\keyboard-dechatter\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use keyboard_dechatter::Config;
//!
//! // Load existing config or use defaults
//! let mut config = Config::load().unwrap_or_default();
//!
//! // Give a worn space bar a wider window
//! config.thresholds.set_override(57, 70);
//!
//! // Save to disk
//! config.save().expect("Failed to save config");
//! ```

use crate::device::DeviceClass;
use crate::keyboard::KeyCode;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Threshold used when no usable configuration has ever been supplied
pub const CONSERVATIVE_THRESHOLD_MS: u64 = 40;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to determine config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
    /// IO error reading or writing config file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Failed to parse config file
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Failed to serialize config
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// Values that would break the filter's timing guarantees
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Returns the application directory under the platform config dir.
///
/// Creates the directory if it doesn't exist.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join("keyboard-dechatter");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir)
}

/// Returns the path to the config file.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join("config.toml"))
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Debounce thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Which keyboards are filtered
    #[serde(default)]
    pub scope: ScopeConfig,
    /// Timestamp cache settings
    #[serde(default)]
    pub timing: TimingConfig,
    /// Fast-path qualification
    #[serde(default)]
    pub activity: ActivityConfig,
    /// Load shedding
    #[serde(default)]
    pub load: LoadConfig,
    /// Event record pool
    #[serde(default)]
    pub pool: PoolConfig,
    /// Per-key state eviction
    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Debounce thresholds per device class, with per-key overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    /// Built-in keyboards
    pub internal_ms: u64,
    /// Cabled external keyboards
    pub external_wired_ms: u64,
    /// Bluetooth and radio keyboards; radio jitter widens genuine gaps
    pub external_wireless_ms: u64,
    /// Per-key overrides: (key_code, threshold_ms). Zero disables filtering.
    #[serde(default)]
    pub key_overrides: Vec<(u16, u64)>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            internal_ms: CONSERVATIVE_THRESHOLD_MS,
            external_wired_ms: CONSERVATIVE_THRESHOLD_MS,
            external_wireless_ms: 60,
            key_overrides: Vec::new(),
        }
    }
}

impl ThresholdConfig {
    /// Same threshold for every class
    pub fn uniform(ms: u64) -> Self {
        Self {
            internal_ms: ms,
            external_wired_ms: ms,
            external_wireless_ms: ms,
            key_overrides: Vec::new(),
        }
    }

    /// Threshold for a device class
    pub fn for_class(&self, class: DeviceClass) -> Duration {
        let ms = match class {
            DeviceClass::Internal => self.internal_ms,
            DeviceClass::ExternalWireless => self.external_wireless_ms,
            DeviceClass::ExternalWired | DeviceClass::Unsupported => self.external_wired_ms,
        };
        Duration::from_millis(ms)
    }

    /// Threshold for a key on a device class, honouring overrides
    pub fn for_key(&self, class: DeviceClass, key: KeyCode) -> Duration {
        self.key_overrides
            .iter()
            .find(|(code, _)| *code == key.0)
            .map(|(_, ms)| Duration::from_millis(*ms))
            .unwrap_or_else(|| self.for_class(class))
    }

    /// Add or replace a per-key override
    pub fn set_override(&mut self, key: u16, ms: u64) {
        self.key_overrides.retain(|(k, _)| *k != key);
        self.key_overrides.push((key, ms));
    }

    pub fn remove_override(&mut self, key: u16) {
        self.key_overrides.retain(|(k, _)| *k != key);
    }

    /// Smallest threshold that actually filters something
    pub fn smallest_active(&self) -> Option<Duration> {
        [self.internal_ms, self.external_wired_ms, self.external_wireless_ms]
            .into_iter()
            .chain(self.key_overrides.iter().map(|(_, ms)| *ms))
            .filter(|ms| *ms > 0)
            .min()
            .map(Duration::from_millis)
    }
}

/// Monitoring scope flags
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeConfig {
    /// Let every event from built-in keyboards through
    pub ignore_internal: bool,
    /// Let every event from external keyboards through
    pub ignore_external: bool,
}

/// Timestamp cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Maximum staleness of a cached timestamp in microseconds
    pub clock_window_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            clock_window_us: 250,
        }
    }
}

impl TimingConfig {
    pub fn clock_window(&self) -> Duration {
        Duration::from_micros(self.clock_window_us)
    }
}

/// Fast-path qualification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityConfig {
    /// Consecutive clean events required before the fast path applies
    pub fast_path_min_events: u32,
    /// A clean event is spaced at least this multiple of the threshold
    pub fast_path_margin: u32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            fast_path_min_events: 8,
            fast_path_margin: 3,
        }
    }
}

/// Load shedding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadConfig {
    /// How often the background sampler reads CPU usage
    pub sample_interval_ms: u64,
    /// How long a sample is trusted before it is considered stale
    pub validity_ms: u64,
    /// Start shedding bookkeeping at or above this CPU usage
    pub high_cpu_percent: f32,
    /// Stop shedding below this CPU usage
    pub low_cpu_percent: f32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            validity_ms: 3000,
            high_cpu_percent: 85.0,
            low_cpu_percent: 70.0,
        }
    }
}

impl LoadConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn validity(&self) -> Duration {
        Duration::from_millis(self.validity_ms)
    }
}

/// Event record pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of idle records kept for reuse
    pub capacity: usize,
    /// Records allocated up front
    pub warmup: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            warmup: 16,
        }
    }
}

/// Per-key state eviction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvictionConfig {
    /// Keys unseen for this long may be forgotten
    pub idle_horizon_secs: u64,
    /// Run an eviction sweep every this many events
    pub check_every_events: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            idle_horizon_secs: 300,
            check_every_events: 4096,
        }
    }
}

impl EvictionConfig {
    pub fn idle_horizon(&self) -> Duration {
        Duration::from_secs(self.idle_horizon_secs)
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed or fails
    /// validation.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check the values the filter relies on.
    ///
    /// The timestamp cache window must stay below the smallest active
    /// threshold, otherwise two genuinely spaced events could share one
    /// cached timestamp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_staleness(self.timing.clock_window())?;
        if self.load.low_cpu_percent > self.load.high_cpu_percent {
            return Err(ConfigError::Invalid(format!(
                "low CPU watermark {} is above high watermark {}",
                self.load.low_cpu_percent, self.load.high_cpu_percent
            )));
        }
        if self.activity.fast_path_min_events == 0 {
            return Err(ConfigError::Invalid(
                "fast_path_min_events must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check a timestamp source that may lag real time by `staleness`
    /// against the thresholds.
    pub fn check_staleness(&self, staleness: Duration) -> Result<(), ConfigError> {
        match self.thresholds.smallest_active() {
            Some(smallest) if staleness >= smallest => Err(ConfigError::Invalid(format!(
                "timestamps up to {}us stale must stay below the smallest threshold {}ms",
                staleness.as_micros(),
                smallest.as_millis()
            ))),
            _ => Ok(()),
        }
    }
}

/// The active configuration with last-known-good fallback
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    current: Arc<Config>,
    fallback: bool,
}

impl ConfigSnapshot {
    /// Start from a supplied config, or the conservative default when
    /// none (or an invalid one) is available.
    pub fn new(initial: Option<Config>) -> Self {
        match initial.map(|c| c.validate().map(|_| c)) {
            Some(Ok(config)) => Self {
                current: Arc::new(config),
                fallback: false,
            },
            Some(Err(e)) => {
                warn!("rejecting initial config, using defaults: {}", e);
                Self::conservative()
            }
            None => Self::conservative(),
        }
    }

    fn conservative() -> Self {
        Self {
            current: Arc::new(Config::default()),
            fallback: true,
        }
    }

    /// Apply an update from the settings collaborator.
    ///
    /// On failure the previous snapshot stays active and the error is
    /// returned for diagnostics.
    pub fn apply(&mut self, update: Result<Config, ConfigError>) -> Result<(), ConfigError> {
        let config = update.and_then(|c| c.validate().map(|_| c));
        match config {
            Ok(config) => {
                self.current = Arc::new(config);
                self.fallback = false;
                Ok(())
            }
            Err(e) => {
                warn!("config update rejected, keeping last known good: {}", e);
                Err(e)
            }
        }
    }

    pub fn current(&self) -> &Arc<Config> {
        &self.current
    }

    /// True while running on the built-in default
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("keyboard-dechatter-test-{}.toml", std::process::id()))
    }

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.thresholds.internal_ms, 40);
        assert_eq!(config.thresholds.external_wired_ms, 40);
        assert_eq!(config.thresholds.external_wireless_ms, 60);
        assert!(!config.scope.ignore_internal);
        assert!(!config.scope.ignore_external);
        assert_eq!(config.timing.clock_window_us, 250);
        assert_eq!(config.activity.fast_path_margin, 3);
        assert_eq!(config.pool.capacity, 64);
        assert_eq!(config.eviction.idle_horizon_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn thresholds_by_class_and_key() {
        let mut t = ThresholdConfig::default();
        assert_eq!(t.for_class(DeviceClass::ExternalWireless), Duration::from_millis(60));
        assert_eq!(t.for_class(DeviceClass::Unsupported), Duration::from_millis(40));

        t.set_override(57, 90);
        t.set_override(57, 80);
        assert_eq!(t.key_overrides.len(), 1);
        assert_eq!(t.for_key(DeviceClass::Internal, KeyCode(57)), Duration::from_millis(80));
        assert_eq!(t.for_key(DeviceClass::Internal, KeyCode(30)), Duration::from_millis(40));

        t.remove_override(57);
        assert!(t.key_overrides.is_empty());
    }

    #[test]
    fn smallest_active_ignores_disabled_keys() {
        let mut t = ThresholdConfig::uniform(35);
        t.set_override(30, 0);
        t.set_override(31, 20);
        assert_eq!(t.smallest_active(), Some(Duration::from_millis(20)));
        assert_eq!(ThresholdConfig::uniform(0).smallest_active(), None);
    }

    #[test]
    fn clock_window_must_be_below_threshold() {
        let mut config = Config::default();
        config.thresholds = ThresholdConfig::uniform(1);
        config.timing.clock_window_us = 1000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.timing.clock_window_us = 999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_watermarks_rejected() {
        let mut config = Config::default();
        config.load.low_cpu_percent = 90.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let path = temp_config_path();

        let mut config = Config::default();
        config.thresholds.external_wireless_ms = 75;
        config.scope.ignore_internal = true;
        config.thresholds.set_override(57, 55);

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn config_load_missing_file_errors() {
        let path = PathBuf::from("/nonexistent/path/config.toml");
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn config_deserializes_partial_toml() {
        let toml_str = r#"
[thresholds]
internal_ms = 30
external_wired_ms = 35
external_wireless_ms = 50
key_overrides = [[57, 70]]

[scope]
ignore_internal = true
ignore_external = false
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.thresholds.internal_ms, 30);
        assert_eq!(config.thresholds.key_overrides, vec![(57, 70)]);
        assert!(config.scope.ignore_internal);
        // Missing sections fall back to defaults
        assert_eq!(config.load, LoadConfig::default());
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn snapshot_without_config_uses_default() {
        let snapshot = ConfigSnapshot::new(None);
        assert!(snapshot.is_fallback());
        assert_eq!(
            snapshot.current().thresholds.external_wired_ms,
            CONSERVATIVE_THRESHOLD_MS
        );
    }

    #[test]
    fn snapshot_keeps_last_known_good() {
        let mut good = Config::default();
        good.thresholds = ThresholdConfig::uniform(35);
        let mut snapshot = ConfigSnapshot::new(Some(good.clone()));
        assert!(!snapshot.is_fallback());

        assert!(snapshot.apply(Err(ConfigError::NoConfigDir)).is_err());
        assert_eq!(**snapshot.current(), good);

        let mut bad = Config::default();
        bad.load.low_cpu_percent = 99.0;
        assert!(snapshot.apply(Ok(bad)).is_err());
        assert_eq!(**snapshot.current(), good);

        let mut next = good.clone();
        next.scope.ignore_external = true;
        assert!(snapshot.apply(Ok(next.clone())).is_ok());
        assert_eq!(**snapshot.current(), next);
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::NoConfigDir;
        assert_eq!(err.to_string(), "Could not determine config directory");

        let io_err = ConfigError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(io_err.to_string().contains("IO error"));
    }
}
