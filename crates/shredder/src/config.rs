//! Configuration for the shredding engine and its illustrative consumer.
//!
//! Layering: built-in defaults, then an optional TOML file, then `SHRED_*`
//! environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

// ============================================================================
// Engine Configuration
// ============================================================================

/// Settings for the shredding engine actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Engine mailbox capacity. One advance signal is in flight per live job,
  /// so this bounds how many jobs can be active at once.
  pub mailbox_capacity: usize,

  /// Watchdog timeout per job, in seconds. A job that reaches neither
  /// completion nor error within this window is failed. 0 disables.
  pub job_timeout_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      mailbox_capacity: 256,
      job_timeout_secs: 300,
    }
  }
}

// ============================================================================
// Stats Configuration
// ============================================================================

/// Settings for the tag statistics consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
  /// Capacity of the element-fact queue. Writes beyond this are deferred
  /// until the consumer catches up, pausing the producing job.
  pub fact_capacity: usize,
}

impl Default for StatsConfig {
  fn default() -> Self {
    Self { fact_capacity: 64 }
  }
}

// ============================================================================
// Top-level Configuration
// ============================================================================

/// Full configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub engine: EngineConfig,
  pub stats: StatsConfig,
}

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("unable to read config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid config file: {0}")]
  Parse(#[from] toml::de::Error),
}

impl Config {
  /// Load configuration: defaults, overlaid with `path` when given, then
  /// with environment variables. A missing explicit file is an error; pass
  /// `None` to run on defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match path {
      Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
      None => Self::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
  }

  /// Overlay settings from an environment-like source. Unparsable values
  /// are ignored, keeping the previous layer's setting.
  fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("SHRED_MAILBOX_CAPACITY").and_then(|v| v.parse().ok()) {
      self.engine.mailbox_capacity = v;
    }
    if let Some(v) = get("SHRED_JOB_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
      self.engine.job_timeout_secs = v;
    }
    if let Some(v) = get("SHRED_FACT_CAPACITY").and_then(|v| v.parse().ok()) {
      self.stats.fact_capacity = v;
    }
  }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn defaults() {
    let config = Config::default();
    assert_eq!(config.engine.mailbox_capacity, 256);
    assert_eq!(config.engine.job_timeout_secs, 300);
    assert_eq!(config.stats.fact_capacity, 64);
  }

  #[test]
  fn partial_file_keeps_defaults_for_the_rest() {
    let config: Config = toml::from_str(
      r#"
        [engine]
        job_timeout_secs = 30
      "#,
    )
    .unwrap();
    assert_eq!(config.engine.job_timeout_secs, 30);
    assert_eq!(config.engine.mailbox_capacity, 256);
    assert_eq!(config.stats.fact_capacity, 64);
  }

  #[test]
  fn environment_overrides_file_values() {
    let mut config: Config = toml::from_str("[stats]\nfact_capacity = 8\n").unwrap();
    let env: HashMap<&str, &str> =
      HashMap::from([("SHRED_FACT_CAPACITY", "16"), ("SHRED_JOB_TIMEOUT_SECS", "not-a-number")]);
    config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(config.stats.fact_capacity, 16);
    assert_eq!(config.engine.job_timeout_secs, 300);
  }
}
