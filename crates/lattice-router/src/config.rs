//! TOML configuration for the router.

use crate::error::{Result, RouterError};
use lattice_models::RoutingStrategy;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Router configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Default routing strategy name.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Response cache entry lifetime in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cache sweeper interval in seconds.
    #[serde(default = "default_cache_sweep_secs")]
    pub cache_sweep_secs: u64,

    /// Alternate models tried after the primary fails.
    #[serde(default = "default_max_fallback_attempts")]
    pub max_fallback_attempts: u32,
}

fn default_strategy() -> String {
    "balanced".to_string()
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

const fn default_cache_sweep_secs() -> u64 {
    300
}

const fn default_max_fallback_attempts() -> u32 {
    2
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_sweep_secs: default_cache_sweep_secs(),
            max_fallback_attempts: default_max_fallback_attempts(),
        }
    }
}

impl RouterConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values.
    ///
    /// # Errors
    /// Returns [`RouterError::Config`] when a value is out of range or the
    /// strategy name is unknown.
    pub fn validate(&self) -> Result<()> {
        self.parsed_strategy()?;
        if self.cache_ttl_secs == 0 {
            return Err(RouterError::Config("cache_ttl_secs must be positive".to_string()));
        }
        if self.cache_sweep_secs == 0 {
            return Err(RouterError::Config("cache_sweep_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Parses the configured strategy name.
    ///
    /// # Errors
    /// Returns [`RouterError::UnknownStrategy`] for unrecognized names.
    pub fn parsed_strategy(&self) -> Result<RoutingStrategy> {
        RoutingStrategy::from_str(&self.strategy)
            .map_err(|_| RouterError::UnknownStrategy(self.strategy.clone()))
    }

    /// Cache lifetime as a duration.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Sweep interval as a duration.
    #[must_use]
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_full_config() {
        let file = write_config(
            r#"
strategy = "cost_optimized"
cache_ttl_secs = 120
cache_sweep_secs = 30
max_fallback_attempts = 1
"#,
        );
        let config = RouterConfig::load(file.path()).unwrap();
        assert_eq!(config.parsed_strategy().unwrap(), RoutingStrategy::CostOptimized);
        assert_eq!(config.cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.max_fallback_attempts, 1);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let file = write_config("");
        let config = RouterConfig::load(file.path()).unwrap();
        assert_eq!(config.strategy, "balanced");
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.max_fallback_attempts, 2);
    }

    #[test]
    fn rejects_unknown_strategy() {
        let file = write_config(r#"strategy = "cheapest""#);
        let err = RouterConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, RouterError::UnknownStrategy(s) if s == "cheapest"));
    }

    #[test]
    fn rejects_zero_ttl() {
        let file = write_config("cache_ttl_secs = 0");
        assert!(matches!(
            RouterConfig::load(file.path()),
            Err(RouterError::Config(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        let file = write_config("strategy = [not toml");
        assert!(matches!(RouterConfig::load(file.path()), Err(RouterError::Toml(_))));
    }
}
