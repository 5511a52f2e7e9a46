#![forbid(unsafe_code)]

//! Runtime tunables.
//!
//! | Setting | Default | Env var |
//! |---------|---------|---------|
//! | `dirty_check_interval` | 120 ms | `TETHER_DIRTY_CHECK_MS` |
//! | `connect_queue_immediate` | 0 | `TETHER_CONNECT_IMMEDIATE` |
//! | `max_flush_iterations` | 10 000 | `TETHER_MAX_FLUSH_ITERATIONS` |
//!
//! With the `config` feature, the same settings load from TOML:
//!
//! ```toml
//! dirty_check_interval_ms = 250
//! connect_queue_immediate = 16
//! max_flush_iterations = 5000
//! ```

use std::time::Duration;

use tether_core::BindingError;

pub const DEFAULT_DIRTY_CHECK_INTERVAL: Duration = Duration::from_millis(120);
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 10_000;

const ENV_DIRTY_CHECK_MS: &str = "TETHER_DIRTY_CHECK_MS";
const ENV_CONNECT_IMMEDIATE: &str = "TETHER_CONNECT_IMMEDIATE";
const ENV_MAX_FLUSH_ITERATIONS: &str = "TETHER_MAX_FLUSH_ITERATIONS";

/// Settings shared by the runtime services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Delay between dirty-check passes.
    pub dirty_check_interval: Duration,
    /// Connects performed synchronously per wave before batching kicks in.
    pub connect_queue_immediate: usize,
    /// Upper bound on micro tasks run by a single flush.
    pub max_flush_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dirty_check_interval: DEFAULT_DIRTY_CHECK_INTERVAL,
            connect_queue_immediate: 0,
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_dirty_check_interval(mut self, interval: Duration) -> Self {
        self.dirty_check_interval = interval;
        self
    }

    #[must_use]
    pub fn with_connect_queue_immediate(mut self, count: usize) -> Self {
        self.connect_queue_immediate = count;
        self
    }

    #[must_use]
    pub fn with_max_flush_iterations(mut self, limit: usize) -> Self {
        self.max_flush_iterations = limit;
        self
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), BindingError> {
        if self.dirty_check_interval.is_zero() {
            return Err(BindingError::InvalidConfig(
                "dirty_check_interval must be non-zero".into(),
            ));
        }
        if self.max_flush_iterations == 0 {
            return Err(BindingError::InvalidConfig(
                "max_flush_iterations must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Defaults overridden by `TETHER_*` environment variables.
    pub fn from_env() -> Result<Self, BindingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BindingError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_DIRTY_CHECK_MS) {
            config.dirty_check_interval = Duration::from_millis(parse_number(ENV_DIRTY_CHECK_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_CONNECT_IMMEDIATE) {
            config.connect_queue_immediate = parse_number(ENV_CONNECT_IMMEDIATE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_FLUSH_ITERATIONS) {
            config.max_flush_iterations = parse_number(ENV_MAX_FLUSH_ITERATIONS, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_toml_str(source: &str) -> Result<Self, BindingError> {
        #[derive(serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawConfig {
            dirty_check_interval_ms: Option<u64>,
            connect_queue_immediate: Option<usize>,
            max_flush_iterations: Option<usize>,
        }

        let raw: RawConfig =
            toml::from_str(source).map_err(|err| BindingError::InvalidConfig(err.to_string()))?;
        let mut config = Self::default();
        if let Some(ms) = raw.dirty_check_interval_ms {
            config.dirty_check_interval = Duration::from_millis(ms);
        }
        if let Some(count) = raw.connect_queue_immediate {
            config.connect_queue_immediate = count;
        }
        if let Some(limit) = raw.max_flush_iterations {
            config.max_flush_iterations = limit;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BindingError> {
    raw.trim()
        .parse()
        .map_err(|_| BindingError::InvalidConfig(format!("{key}={raw:?} is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.dirty_check_interval, Duration::from_millis(120));
        assert_eq!(config.connect_queue_immediate, 0);
        assert_eq!(config.max_flush_iterations, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("TETHER_DIRTY_CHECK_MS", "50"),
            ("TETHER_MAX_FLUSH_ITERATIONS", " 20 "),
        ]))
        .unwrap();
        assert_eq!(config.dirty_check_interval, Duration::from_millis(50));
        assert_eq!(config.max_flush_iterations, 20);
        assert_eq!(config.connect_queue_immediate, 0);
    }

    #[test]
    fn env_rejects_garbage_and_zero() {
        let err = RuntimeConfig::from_lookup(lookup(&[("TETHER_DIRTY_CHECK_MS", "soon")])).unwrap_err();
        assert!(matches!(err, BindingError::InvalidConfig(_)));
        let err = RuntimeConfig::from_lookup(lookup(&[("TETHER_DIRTY_CHECK_MS", "0")])).unwrap_err();
        assert!(matches!(err, BindingError::InvalidConfig(_)));
    }

    #[test]
    fn builders_chain() {
        let config = RuntimeConfig::default()
            .with_dirty_check_interval(Duration::from_millis(10))
            .with_connect_queue_immediate(3)
            .with_max_flush_iterations(7);
        assert_eq!(config.connect_queue_immediate, 3);
        assert_eq!(config.max_flush_iterations, 7);
        assert!(RuntimeConfig::default()
            .with_max_flush_iterations(0)
            .validate()
            .is_err());
    }

    #[cfg(feature = "config")]
    #[test]
    fn toml_overrides_apply() {
        let config = RuntimeConfig::from_toml_str("dirty_check_interval_ms = 250\n").unwrap();
        assert_eq!(config.dirty_check_interval, Duration::from_millis(250));
        assert!(RuntimeConfig::from_toml_str("bogus = 1").is_err());
    }
}
