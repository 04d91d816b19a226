//! Configuration management for Strata services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`STRATA__` prefix, `__` separator)
//! 2. Config file (`strata.toml`)
//! 3. Defaults

use serde::Deserialize;

/// Top-level store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StrataConfig {
    /// Platform-default quotas, applied when a group's effective
    /// settings leave a quota unset.
    #[serde(default)]
    pub quotas: QuotaDefaults,

    /// Knowledge index tuning.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Retry policy for transient infrastructure errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Path of the JSON snapshot file, if persistence is enabled.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

/// Platform-wide quota fallbacks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QuotaDefaults {
    #[serde(default = "default_max_entities")]
    pub max_entities: u64,

    #[serde(default = "default_max_relationships")]
    pub max_relationships: u64,

    #[serde(default = "default_max_knowledge_records")]
    pub max_knowledge_records: u64,
}

/// Knowledge index tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KnowledgeConfig {
    /// Seconds between automatic promotions of pending embeddings into
    /// the searchable segment. Bounds the upsert-to-searchable lag.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

/// Bounded exponential backoff for transient errors.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl StrataConfig {
    /// Load configuration from `<file_prefix>.toml` and `STRATA__*`
    /// environment variables, falling back to defaults.
    pub fn load(file_prefix: &str) -> Self {
        let built = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("STRATA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build();

        match built.and_then(|c| c.try_deserialize::<StrataConfig>()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to default configuration");
                StrataConfig::default()
            }
        }
    }
}

fn default_max_entities() -> u64 {
    100_000
}

fn default_max_relationships() -> u64 {
    500_000
}

fn default_max_knowledge_records() -> u64 {
    250_000
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            quotas: QuotaDefaults::default(),
            knowledge: KnowledgeConfig::default(),
            retry: RetryConfig::default(),
            snapshot_path: None,
        }
    }
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            max_entities: default_max_entities(),
            max_relationships: default_max_relationships(),
            max_knowledge_records: default_max_knowledge_records(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StrataConfig::default();
        assert_eq!(config.quotas.max_entities, 100_000);
        assert_eq!(config.knowledge.refresh_interval_secs, 30);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: StrataConfig =
            serde_json::from_str(r#"{"quotas": {"max_entities": 10}}"#).unwrap();
        assert_eq!(config.quotas.max_entities, 10);
        assert_eq!(config.quotas.max_relationships, 500_000);
        assert_eq!(config.retry.base_delay_ms, 50);
    }
}
