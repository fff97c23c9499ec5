//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Limits and pacing of the tick driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one entity's evaluation
    #[serde(with = "secs")]
    pub entity_timeout: Duration,

    /// Max entity evaluations in flight
    pub max_concurrency: NonZeroUsize,

    /// Stop after this many ticks (None = until shutdown)
    pub max_ticks: Option<usize>,

    /// Pause between ticks
    #[serde(with = "secs")]
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entity_timeout: Duration::from_secs(60),
            max_concurrency: NonZeroUsize::MIN.saturating_add(7),
            max_ticks: None,
            tick_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create a config with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file; missing fields keep their defaults.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Set the per-entity deadline.
    pub fn with_entity_timeout(mut self, timeout: Duration) -> Self {
        self.entity_timeout = timeout;
        self
    }

    /// Set max concurrent entity evaluations.
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Stop after `max` ticks.
    pub fn with_max_ticks(mut self, max: usize) -> Self {
        self.max_ticks = Some(max);
        self
    }

    /// Set the pause between ticks.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

/// Durations as whole seconds in config files.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.entity_timeout, Duration::from_secs(60));
        assert_eq!(config.max_concurrency.get(), 8);
        assert_eq!(config.max_ticks, None);
        assert_eq!(config.tick_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"entity_timeout": 5, "max_ticks": 3}"#).unwrap();
        assert_eq!(config.entity_timeout, Duration::from_secs(5));
        assert_eq!(config.max_ticks, Some(3));
        assert_eq!(config.max_concurrency.get(), 8);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_max_concurrency(NonZeroUsize::MIN)
            .with_tick_interval(Duration::from_secs(1))
            .with_max_ticks(2);
        assert_eq!(config.max_concurrency.get(), 1);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.max_ticks, Some(2));
    }
}
