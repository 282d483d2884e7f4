//! Config - エンジン設定（TOML）
//!
//! 全体のデフォルト (`[defaults]`) の上に tube ごとの上書き
//! (`[tubes.<name>]`) を重ねて `TubeSettings` を作る。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{
    DEFAULT_PRIORITY, DEFAULT_TTR, MAX_DURATION, TubeName, TubeNameError, TubeSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid tube name in config: {0}")]
    TubeName(#[from] TubeNameError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub defaults: TubeDefaults,
    /// Per-tube overrides, keyed by tube name.
    pub tubes: BTreeMap<String, TubeOverrides>,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound between two passes over every tube.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults applied to every tube. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TubeDefaults {
    pub priority: u32,
    pub delay_secs: u64,
    pub ttr_secs: u64,
    pub reserve_timeout_secs: Option<u64>,
    pub max_reserves: Option<u32>,
    pub peek_window: Option<usize>,
}

impl Default for TubeDefaults {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay_secs: 0,
            ttr_secs: DEFAULT_TTR.as_secs(),
            reserve_timeout_secs: None,
            max_reserves: None,
            peek_window: None,
        }
    }
}

/// Per-tube overrides. Unset fields fall back to `TubeDefaults`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TubeOverrides {
    pub priority: Option<u32>,
    pub delay_secs: Option<u64>,
    pub ttr_secs: Option<u64>,
    pub reserve_timeout_secs: Option<u64>,
    pub max_reserves: Option<u32>,
    pub peek_window: Option<usize>,
}

/// Connection parameters for a networked backend. The in-memory engine
/// carries them through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11300,
            connect_timeout_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl EngineConfig {
    /// Parse and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::Invalid("connection.port must not be 0".into()));
        }
        let d = &self.defaults;
        check_limits("defaults", d.max_reserves, d.peek_window)?;
        check_durations(
            "defaults",
            &[
                ("delay_secs", Some(d.delay_secs)),
                ("ttr_secs", Some(d.ttr_secs)),
                ("reserve_timeout_secs", d.reserve_timeout_secs),
            ],
        )?;
        for (name, o) in &self.tubes {
            TubeName::new(name.as_str())?;
            check_limits(name, o.max_reserves, o.peek_window)?;
            check_durations(
                name,
                &[
                    ("delay_secs", o.delay_secs),
                    ("ttr_secs", o.ttr_secs),
                    ("reserve_timeout_secs", o.reserve_timeout_secs),
                ],
            )?;
        }
        Ok(())
    }

    /// Settings for `tube`: defaults with its overrides on top.
    pub fn settings_for(&self, tube: &TubeName) -> TubeSettings {
        let d = &self.defaults;
        let o = self.tubes.get(tube.as_str()).cloned().unwrap_or_default();
        TubeSettings {
            priority: o.priority.unwrap_or(d.priority),
            delay: secs(o.delay_secs.unwrap_or(d.delay_secs)),
            ttr: secs(o.ttr_secs.unwrap_or(d.ttr_secs)),
            reserve_timeout: o.reserve_timeout_secs.or(d.reserve_timeout_secs).map(secs),
            max_reserves: o.max_reserves.or(d.max_reserves),
            peek_window: o.peek_window.or(d.peek_window),
        }
    }

    /// Names of the tubes that carry overrides.
    pub fn configured_tubes(&self) -> Result<Vec<TubeName>, ConfigError> {
        self.tubes
            .keys()
            .map(|name| TubeName::new(name.as_str()).map_err(ConfigError::from))
            .collect()
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn check_limits(
    scope: &str,
    max_reserves: Option<u32>,
    peek_window: Option<usize>,
) -> Result<(), ConfigError> {
    if max_reserves == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{scope}: max_reserves must be at least 1"
        )));
    }
    if peek_window == Some(0) {
        return Err(ConfigError::Invalid(format!(
            "{scope}: peek_window must be at least 1"
        )));
    }
    Ok(())
}

fn check_durations(scope: &str, fields: &[(&str, Option<u64>)]) -> Result<(), ConfigError> {
    let max = MAX_DURATION.as_secs();
    for (field, value) in fields {
        if value.is_some_and(|v| v > max) {
            return Err(ConfigError::Invalid(format!(
                "{scope}: {field} must be at most {max}"
            )));
        }
    }
    Ok(())
}
