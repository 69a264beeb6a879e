//! Coordinator configuration
//!
//! Priority: environment (`TANDEM_*`) > TOML file > defaults.

use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::identity::DEFAULT_LOCAL_KEY_FLOOR;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration of one coordinator instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Coordinator name, used in logs
    pub name: String,

    /// Number of gate shards (1 = fully serialized)
    pub gate_shards: usize,

    /// Gate acquisition timeout in milliseconds (`None` waits forever)
    pub gate_timeout_ms: Option<u64>,

    /// First key of the locally-originated key range
    pub local_key_floor: u64,

    /// Capacity of the replication event channel
    pub event_capacity: usize,

    /// Interval between background reconciliation passes in milliseconds
    pub reconcile_interval_ms: u64,

    /// Maximum pending changes replayed per reconciliation pass
    pub reconcile_batch: usize,

    /// Backoff applied by the background reconciler while the primary is down
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "tandem".to_string(),
            gate_shards: 1,
            gate_timeout_ms: None,
            local_key_floor: DEFAULT_LOCAL_KEY_FLOOR,
            event_capacity: 256,
            reconcile_interval_ms: 30_000,
            reconcile_batch: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the number of gate shards
    pub fn with_gate_shards(mut self, shards: usize) -> Self {
        self.gate_shards = shards;
        self
    }

    /// Set the gate acquisition timeout
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set the first locally-originated key
    pub fn with_local_key_floor(mut self, floor: u64) -> Self {
        self.local_key_floor = floor;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the background reconciliation interval
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the reconciliation batch size
    pub fn with_reconcile_batch(mut self, batch: usize) -> Self {
        self.reconcile_batch = batch;
        self
    }

    /// Set the reconciler backoff policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Gate acquisition timeout
    pub fn gate_timeout(&self) -> Option<Duration> {
        self.gate_timeout_ms.map(Duration::from_millis)
    }

    /// Background reconciliation interval
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.gate_shards == 0 {
            return Err("gate_shards must be at least 1".into());
        }
        if self.gate_timeout_ms == Some(0) {
            return Err("gate_timeout_ms must be > 0 when set".into());
        }
        if self.local_key_floor == 0 {
            return Err("local_key_floor must be > 0".into());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".into());
        }
        if self.reconcile_interval_ms == 0 {
            return Err("reconcile_interval_ms must be > 0".into());
        }
        if self.reconcile_batch == 0 {
            return Err("reconcile_batch must be at least 1".into());
        }
        self.retry.validate()
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML: {e}")))
    }

    /// Load a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded coordinator configuration from {:?}", path);
        Ok(config)
    }

    /// Defaults overridden by `TANDEM_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `TANDEM_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Override fields from variables supplied by `lookup`
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(name) = lookup("TANDEM_NAME") {
            self.name = name;
        }
        if let Some(shards) = parse_var(&lookup, "TANDEM_GATE_SHARDS")? {
            self.gate_shards = shards;
        }
        if let Some(timeout) = parse_var(&lookup, "TANDEM_GATE_TIMEOUT_MS")? {
            self.gate_timeout_ms = Some(timeout);
        }
        if let Some(floor) = parse_var(&lookup, "TANDEM_LOCAL_KEY_FLOOR")? {
            self.local_key_floor = floor;
        }
        if let Some(capacity) = parse_var(&lookup, "TANDEM_EVENT_CAPACITY")? {
            self.event_capacity = capacity;
        }
        if let Some(interval) = parse_var(&lookup, "TANDEM_RECONCILE_INTERVAL_MS")? {
            self.reconcile_interval_ms = interval;
        }
        if let Some(batch) = parse_var(&lookup, "TANDEM_RECONCILE_BATCH")? {
            self.reconcile_batch = batch;
        }
        Ok(())
    }
}

fn parse_var<V: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<V>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::config(format!("{name}: invalid value {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.gate_shards, 1);
        assert_eq!(config.gate_timeout(), None);
        assert_eq!(config.local_key_floor, DEFAULT_LOCAL_KEY_FLOOR);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = CoordinatorConfig::new("billing")
            .with_gate_shards(4)
            .with_gate_timeout(Duration::from_secs(2))
            .with_reconcile_interval(Duration::from_millis(1500));
        assert_eq!(config.name, "billing");
        assert_eq!(config.gate_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.reconcile_interval(), Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        assert!(CoordinatorConfig::default().with_gate_shards(0).validate().is_err());
        assert!(CoordinatorConfig::default().with_local_key_floor(0).validate().is_err());
        assert!(CoordinatorConfig::default().with_reconcile_batch(0).validate().is_err());
        assert!(CoordinatorConfig::default()
            .with_gate_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            name = "lab-results"
            gate_shards = 8

            [retry]
            initial_delay_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "lab-results");
        assert_eq!(config.gate_shards, 8);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.retry.max_delay_ms, RetryPolicy::default().max_delay_ms);
        assert_eq!(config.reconcile_batch, 100);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = CoordinatorConfig::from_toml_str("gate_shards = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tandem.toml");
        std::fs::write(&path, "local_key_floor = 5000\n").unwrap();
        let config = CoordinatorConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.local_key_floor, 5000);

        let missing = CoordinatorConfig::from_toml_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let vars: HashMap<&str, &str> = [
            ("TANDEM_GATE_SHARDS", "16"),
            ("TANDEM_GATE_TIMEOUT_MS", " 750 "),
            ("TANDEM_RECONCILE_BATCH", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = CoordinatorConfig::from_toml_str("gate_shards = 2\nname = \"audit\"").unwrap();
        config
            .apply_env_with(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.name, "audit");
        assert_eq!(config.gate_shards, 16);
        assert_eq!(config.gate_timeout(), Some(Duration::from_millis(750)));
        assert_eq!(config.reconcile_batch, 10);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = CoordinatorConfig::default();
        let err = config
            .apply_env_with(|name| (name == "TANDEM_LOCAL_KEY_FLOOR").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TANDEM_LOCAL_KEY_FLOOR"));
    }
}
