//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `resonance-config.yaml` next to the
//! binary's working directory. Every section has defaults, so an empty file
//! (or no file at all) yields a usable single-process field with three
//! channels.
//!
//! [`FieldConfig::validate`] runs at startup and rejects anything that
//! would otherwise only fail at mutation time: bad ranges, duplicate
//! channels, an incomplete weight table, zero intervals.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use resonance_types::{ChannelSpec, ContributionKind};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is semantically invalid.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `resonance-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConfig {
    /// Channel declarations.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSpec>,

    /// Weight applied to the raw delta of each contribution kind.
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<ContributionKind, f64>,

    /// Per-source trust multipliers. Sources not listed get `1.0`.
    #[serde(default)]
    pub trust: BTreeMap<String, f64>,

    /// Per-source coalescing window.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Baseline settling.
    #[serde(default)]
    pub decay: DecayConfig,

    /// Mutation history buffer.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Subscriber fan-out.
    #[serde(default)]
    pub hub: HubConfig,

    /// Named levels whose crossings are recorded.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdConfig>,

    /// Snapshot load/checkpoint settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP listener.
    #[serde(default)]
    pub server: ServerSettings,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            weights: default_weights(),
            trust: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            decay: DecayConfig::default(),
            history: HistoryConfig::default(),
            hub: HubConfig::default(),
            thresholds: default_thresholds(),
            persistence: PersistenceConfig::default(),
            server: ServerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FieldConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// Environment variables override file values:
    /// - `RESONANCE_HOST` overrides `server.host`
    /// - `RESONANCE_PORT` overrides `server.port`
    /// - `RESONANCE_SNAPSHOT_PATH` overrides `persistence.snapshot_path`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("RESONANCE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("RESONANCE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| invalid(format!("RESONANCE_PORT `{port}`: {e}")))?;
        }
        if let Ok(path) = std::env::var("RESONANCE_SNAPSHOT_PATH") {
            self.persistence.snapshot_path = Some(path);
        }
        Ok(())
    }

    /// Check every cross-field invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(invalid("at least one channel must be declared"));
        }

        let mut names = BTreeSet::new();
        for spec in &self.channels {
            validate_channel(spec)?;
            if !names.insert(spec.name.as_str()) {
                return Err(invalid(format!("duplicate channel `{}`", spec.name)));
            }
        }

        for kind in ContributionKind::ALL {
            match self.weights.get(&kind) {
                None => return Err(invalid(format!("weight table has no entry for `{kind}`"))),
                Some(w) if !w.is_finite() => {
                    return Err(invalid(format!("weight for `{kind}` is not finite")));
                }
                Some(_) => {}
            }
        }

        for (source, trust) in &self.trust {
            if !trust.is_finite() || *trust < 0.0 {
                return Err(invalid(format!(
                    "trust for source `{source}` must be a finite non-negative number"
                )));
            }
        }

        if self.decay.enabled {
            if self.decay.interval_ms == 0 {
                return Err(invalid("decay.interval_ms must be at least 1"));
            }
            if !self.decay.step.is_finite() || self.decay.step <= 0.0 {
                return Err(invalid("decay.step must be a finite positive number"));
            }
        }

        if self.history.max_entries == 0 {
            return Err(invalid("history.max_entries must be at least 1"));
        }
        if self.hub.queue_capacity == 0 {
            return Err(invalid("hub.queue_capacity must be at least 1"));
        }
        if self.persistence.snapshot_path.is_some() && self.persistence.checkpoint_interval_ms == 0
        {
            return Err(invalid("persistence.checkpoint_interval_ms must be at least 1"));
        }

        for threshold in &self.thresholds {
            if !names.contains(threshold.channel.as_str()) {
                return Err(invalid(format!(
                    "threshold `{}` references unknown channel `{}`",
                    threshold.name, threshold.channel
                )));
            }
            if !threshold.level.is_finite() {
                return Err(invalid(format!("threshold `{}` level is not finite", threshold.name)));
            }
        }

        Ok(())
    }
}

fn validate_channel(spec: &ChannelSpec) -> Result<(), ConfigError> {
    if spec.name.trim().is_empty() {
        return Err(invalid("channel name must not be empty"));
    }
    let finite = spec.min.is_finite()
        && spec.max.is_finite()
        && spec.initial.is_finite()
        && spec.baseline.is_none_or(f64::is_finite);
    if !finite {
        return Err(invalid(format!("channel `{}` has non-finite bounds", spec.name)));
    }
    if spec.min >= spec.max {
        return Err(invalid(format!(
            "channel `{}` has min {} >= max {}",
            spec.name, spec.min, spec.max
        )));
    }
    if !spec.contains(spec.initial) {
        return Err(invalid(format!(
            "channel `{}` initial value {} is outside [{}, {}]",
            spec.name, spec.initial, spec.min, spec.max
        )));
    }
    if let Some(baseline) = spec.baseline {
        if !spec.contains(baseline) {
            return Err(invalid(format!(
                "channel `{}` baseline {baseline} is outside [{}, {}]",
                spec.name, spec.min, spec.max
            )));
        }
    }
    Ok(())
}

/// Per-source coalescing window.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    /// Contributions from one source to one channel within this many
    /// milliseconds are summed and applied once. `0` disables coalescing.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl RateLimitConfig {
    /// The cooldown as a [`Duration`].
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Baseline settling configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecayConfig {
    /// Whether the decay ticker runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ticker period in milliseconds.
    #[serde(default = "default_decay_interval_ms")]
    pub interval_ms: u64,

    /// Maximum distance moved toward the baseline per tick.
    #[serde(default = "default_decay_step")]
    pub step: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_decay_interval_ms(),
            step: default_decay_step(),
        }
    }
}

impl DecayConfig {
    /// The ticker period as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// History buffer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryConfig {
    /// Maximum retained entries; oldest are evicted first.
    #[serde(default = "default_history_max")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_history_max(),
        }
    }
}

/// Subscriber fan-out configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Pending messages per subscriber before intermediate snapshots are
    /// dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum retained threshold transitions.
    #[serde(default = "default_transition_log")]
    pub transition_log: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            transition_log: default_transition_log(),
        }
    }
}

/// A named level on one channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdConfig {
    /// Name recorded on each crossing.
    pub name: String,
    /// Channel being watched.
    pub channel: String,
    /// Level that counts as crossed when reached from below.
    pub level: f64,
}

/// Snapshot persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// JSON snapshot file. `None` disables load and checkpointing.
    #[serde(default)]
    pub snapshot_path: Option<String>,

    /// How often to checkpoint, in milliseconds.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
        }
    }
}

impl PersistenceConfig {
    /// The checkpoint period as a [`Duration`].
    pub const fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_channels() -> Vec<ChannelSpec> {
    vec![
        ChannelSpec::new("coherence", 0.0, 100.0, 72.0).with_baseline(72.0),
        ChannelSpec::new("resonance", 0.0, 100.0, 50.0).with_baseline(50.0),
        ChannelSpec::new("vitality", 0.0, 1.0, 0.5).with_baseline(0.5),
    ]
}

fn default_weights() -> BTreeMap<ContributionKind, f64> {
    BTreeMap::from([
        (ContributionKind::Message, 0.01),
        (ContributionKind::Practice, 0.05),
        (ContributionKind::Ceremony, 0.1),
        (ContributionKind::SensorReading, 0.02),
        (ContributionKind::Work, 0.05),
        (ContributionKind::Decision, 0.08),
        (ContributionKind::Breakthrough, 0.2),
    ])
}

fn default_thresholds() -> Vec<ThresholdConfig> {
    vec![
        ThresholdConfig {
            name: String::from("resonant"),
            channel: String::from("coherence"),
            level: 80.0,
        },
        ThresholdConfig {
            name: String::from("warning"),
            channel: String::from("coherence"),
            level: 50.0,
        },
    ]
}

const fn default_true() -> bool {
    true
}

const fn default_cooldown_ms() -> u64 {
    100
}

const fn default_decay_interval_ms() -> u64 {
    5_000
}

const fn default_decay_step() -> f64 {
    1.0
}

const fn default_history_max() -> usize {
    1_000
}

const fn default_queue_capacity() -> usize {
    50
}

const fn default_transition_log() -> usize {
    200
}

const fn default_checkpoint_interval_ms() -> u64 {
    30_000
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FieldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.channels.len(), 3);
        assert_eq!(config.rate_limit.cooldown_ms, 100);
        assert_eq!(config.decay.interval_ms, 5_000);
        assert_eq!(config.history.max_entries, 1_000);
        assert_eq!(config.hub.queue_capacity, 50);
    }

    #[test]
    fn empty_yaml_uses_defaults() {
        let config = FieldConfig::parse("{}");
        assert!(config.is_ok_and(|c| c.channels.len() == 3 && c.weights.len() == 7));
    }

    #[test]
    fn parses_full_document() {
        let yaml = r"
channels:
  - name: coherence
    min: 0.0
    max: 100.0
    initial: 50.0
    baseline: 50.0
weights:
  message: 0.01
  practice: 0.05
  ceremony: 0.1
  sensor_reading: 0.02
  work: 0.05
  decision: 0.08
  breakthrough: 0.2
trust:
  agent-1: 0.5
rate_limit:
  cooldown_ms: 250
decay:
  interval_ms: 1000
  step: 0.5
thresholds:
  - name: high
    channel: coherence
    level: 90.0
logging:
  format: json
";
        let config = FieldConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let Ok(config) = config else { return };
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.rate_limit.cooldown(), Duration::from_millis(250));
        assert_eq!(config.trust.get("agent-1").copied(), Some(0.5));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.thresholds.len(), 1);
    }

    #[test]
    fn rejects_incomplete_weight_table() {
        let yaml = "weights:\n  message: 0.01\n";
        let result = FieldConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_unknown_kind_in_weight_table() {
        let yaml = "weights:\n  sigil: 0.5\n";
        assert!(matches!(FieldConfig::parse(yaml), Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn rejects_inverted_range() {
        let mut config = FieldConfig::default();
        config.channels = vec![ChannelSpec::new("coherence", 100.0, 0.0, 50.0)];
        config.thresholds.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_channels() {
        let mut config = FieldConfig::default();
        config
            .channels
            .push(ChannelSpec::new("coherence", 0.0, 1.0, 0.5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_baseline_out_of_range() {
        let mut config = FieldConfig::default();
        config.channels = vec![ChannelSpec::new("coherence", 0.0, 100.0, 50.0).with_baseline(120.0)];
        config.thresholds.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_threshold_on_unknown_channel() {
        let mut config = FieldConfig::default();
        config.thresholds.push(ThresholdConfig {
            name: String::from("portal"),
            channel: String::from("love"),
            level: 88.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_history_and_queue() {
        let mut config = FieldConfig::default();
        config.history.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = FieldConfig::default();
        config.hub.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_decay_interval_only_when_enabled() {
        let mut config = FieldConfig::default();
        config.decay.interval_ms = 0;
        assert!(config.validate().is_err());
        config.decay.enabled = false;
        assert!(config.validate().is_ok());
    }
}
