//! Coordinator configuration.
//!
//! [`Config`] is the typed form consumed by the service. [`ConfigProperties`]
//! is the string key/value form an embedding application usually loads from
//! its own configuration files; [`Config::from_properties`] maps one to the
//! other.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Property key for the log directory.
pub const LOG_BASE_DIR: &str = "concord.log_base_dir";
/// Property key for the log file base name.
pub const LOG_BASE_NAME: &str = "concord.log_base_name";
/// Property key for the coordinator id namespace.
pub const TM_UNIQUE_NAME: &str = "concord.tm_unique_name";
/// Property key for in-doubt ticks before a forced decision.
pub const MAX_INDOUBT_TICKS: &str = "concord.max_indoubt_ticks";
/// Property key for active ticks before a rollback.
pub const TIMEOUT_TICKS: &str = "concord.timeout_ticks";
/// Property key selecting heuristic commit for subordinates.
pub const PREFER_HEURISTIC_COMMIT: &str = "concord.prefer_heuristic_commit";
/// Property key controlling fsync on every log record.
pub const FORCE_WRITES: &str = "concord.force_writes";
/// Property key enabling parallel participant calls.
pub const THREADED_2PC: &str = "concord.threaded_2pc";
/// Property key for the timeout tick interval in milliseconds.
pub const TICK_INTERVAL_MS: &str = "concord.tick_interval_ms";

/// Configuration for a transaction service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the log and its lock file.
    pub log_dir: PathBuf,

    /// Base name of the log (`<base>.log`) and lock (`<base>.lck`) files.
    pub log_base_name: String,

    /// Namespace for generated coordinator ids.
    pub tm_unique_name: String,

    /// Timeout ticks an in-doubt coordinator waits before deciding alone.
    pub max_indoubt_ticks: u32,

    /// Timeout ticks an active transaction may live before rollback.
    pub timeout_ticks: u32,

    /// Whether a subordinate forced to decide prefers commit.
    pub prefer_heuristic_commit: bool,

    /// Whether every log record is fsynced before the call returns.
    pub force_writes: bool,

    /// Whether participant calls of one transaction run in parallel.
    pub concurrent_dispatch: bool,

    /// Interval between timeout ticks of the background driver.
    pub tick_interval: Duration,

    /// Whether to create the log directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("."),
            log_base_name: "tmlog".to_string(),
            tm_unique_name: default_tm_unique_name(),
            max_indoubt_ticks: 30,
            timeout_ticks: 10,
            prefer_heuristic_commit: false,
            force_writes: true,
            concurrent_dispatch: false,
            tick_interval: Duration::from_secs(1),
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log directory.
    #[must_use]
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Sets the log base name.
    #[must_use]
    pub fn log_base_name(mut self, name: impl Into<String>) -> Self {
        self.log_base_name = name.into();
        self
    }

    /// Sets the coordinator id namespace.
    #[must_use]
    pub fn tm_unique_name(mut self, name: impl Into<String>) -> Self {
        self.tm_unique_name = name.into();
        self
    }

    /// Sets the in-doubt tick limit.
    #[must_use]
    pub const fn max_indoubt_ticks(mut self, ticks: u32) -> Self {
        self.max_indoubt_ticks = ticks;
        self
    }

    /// Sets the active transaction tick limit.
    #[must_use]
    pub const fn timeout_ticks(mut self, ticks: u32) -> Self {
        self.timeout_ticks = ticks;
        self
    }

    /// Sets whether subordinates prefer heuristic commit.
    #[must_use]
    pub const fn prefer_heuristic_commit(mut self, value: bool) -> Self {
        self.prefer_heuristic_commit = value;
        self
    }

    /// Sets whether every log record is fsynced.
    #[must_use]
    pub const fn force_writes(mut self, value: bool) -> Self {
        self.force_writes = value;
        self
    }

    /// Sets whether participant calls run in parallel.
    #[must_use]
    pub const fn concurrent_dispatch(mut self, value: bool) -> Self {
        self.concurrent_dispatch = value;
        self
    }

    /// Sets the timeout tick interval.
    #[must_use]
    pub const fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets whether to create the log directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Checks the values the coordinator relies on.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for zero tick limits, a zero
    /// tick interval, or empty names.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_indoubt_ticks == 0 {
            return Err(CoreError::invalid_config("max_indoubt_ticks must be at least 1"));
        }
        if self.timeout_ticks == 0 {
            return Err(CoreError::invalid_config("timeout_ticks must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(CoreError::invalid_config("tick_interval must be positive"));
        }
        if self.log_base_name.trim().is_empty() {
            return Err(CoreError::invalid_config("log_base_name is empty"));
        }
        if self.tm_unique_name.trim().is_empty() {
            return Err(CoreError::invalid_config("tm_unique_name is empty"));
        }
        Ok(())
    }

    /// Builds a configuration from string properties.
    ///
    /// Unset keys keep their defaults.
    pub fn from_properties(props: &ConfigProperties) -> CoreResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = props.get(LOG_BASE_DIR) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(name) = props.get(LOG_BASE_NAME) {
            config.log_base_name = name;
        }
        config.tm_unique_name = props.tm_unique_name();
        if props.contains(MAX_INDOUBT_TICKS) {
            config.max_indoubt_ticks = props.get_as_u32(MAX_INDOUBT_TICKS)?;
        }
        if props.contains(TIMEOUT_TICKS) {
            config.timeout_ticks = props.get_as_u32(TIMEOUT_TICKS)?;
        }
        if props.contains(PREFER_HEURISTIC_COMMIT) {
            config.prefer_heuristic_commit = props.get_as_bool(PREFER_HEURISTIC_COMMIT)?;
        }
        if props.contains(FORCE_WRITES) {
            config.force_writes = props.get_as_bool(FORCE_WRITES)?;
        }
        if props.contains(THREADED_2PC) {
            config.concurrent_dispatch = props.get_as_bool(THREADED_2PC)?;
        }
        if props.contains(TICK_INTERVAL_MS) {
            config.tick_interval = Duration::from_millis(props.get_as_u64(TICK_INTERVAL_MS)?);
        }
        config.validate()?;
        Ok(config)
    }
}

fn default_tm_unique_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("concord-{}", &suffix[..8])
}

/// String properties with typed accessors.
///
/// Values are trimmed on read. A `tm_unique_name` is generated once if none
/// is configured, and never replaces an explicit one.
#[derive(Debug, Clone, Default)]
pub struct ConfigProperties {
    values: HashMap<String, String>,
}

impl ConfigProperties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a property set from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets a property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Whether a property is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the trimmed value, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.trim().to_string())
    }

    /// Returns the trimmed value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the property is not set.
    pub fn get_property(&self, key: &str) -> CoreResult<String> {
        self.get(key)
            .ok_or_else(|| CoreError::invalid_config(format!("property {key} is not set")))
    }

    /// Parses a property as a boolean (`true`/`false`, case-insensitive).
    pub fn get_as_bool(&self, key: &str) -> CoreResult<bool> {
        let value = self.get_property(key)?;
        match value.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(CoreError::invalid_config(format!(
                "property {key} is not a boolean: {value}"
            ))),
        }
    }

    /// Parses a property as an unsigned 32-bit integer.
    pub fn get_as_u32(&self, key: &str) -> CoreResult<u32> {
        let value = self.get_property(key)?;
        value.parse().map_err(|_| {
            CoreError::invalid_config(format!("property {key} is not an integer: {value}"))
        })
    }

    /// Parses a property as an unsigned 64-bit integer.
    pub fn get_as_u64(&self, key: &str) -> CoreResult<u64> {
        let value = self.get_property(key)?;
        value.parse().map_err(|_| {
            CoreError::invalid_config(format!("property {key} is not an integer: {value}"))
        })
    }

    /// Merges user-specific overrides into this set.
    pub fn apply_user_specific(&mut self, overrides: &ConfigProperties) {
        for (key, value) in &overrides.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Returns the configured `tm_unique_name`, generating one if unset.
    pub fn tm_unique_name(&self) -> String {
        self.get(TM_UNIQUE_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(default_tm_unique_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.log_base_name, "tmlog");
        assert_eq!(config.max_indoubt_ticks, 30);
        assert!(config.force_writes);
        assert!(!config.prefer_heuristic_commit);
        assert!(config.tm_unique_name.starts_with("concord-"));
        config.validate().unwrap();
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .log_dir("/var/lib/concord")
            .max_indoubt_ticks(10)
            .prefer_heuristic_commit(true)
            .concurrent_dispatch(true);

        assert_eq!(config.log_dir, PathBuf::from("/var/lib/concord"));
        assert_eq!(config.max_indoubt_ticks, 10);
        assert!(config.prefer_heuristic_commit);
        assert!(config.concurrent_dispatch);
    }

    #[test]
    fn validate_rejects_zero_ticks() {
        assert!(matches!(
            Config::new().max_indoubt_ticks(0).validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
        assert!(Config::new().timeout_ticks(0).validate().is_err());
        assert!(Config::new().tm_unique_name("  ").validate().is_err());
    }

    #[test]
    fn get_property_fails_if_not_set() {
        let props = ConfigProperties::new();
        assert!(props.get_property("bla").is_err());
    }

    #[test]
    fn get_property_trims_spaces() {
        let mut props = ConfigProperties::new();
        props.set_property("custom", " bla ");
        assert_eq!(props.get_property("custom").unwrap(), "bla");
    }

    #[test]
    fn typed_getters() {
        let props = ConfigProperties::from_pairs([("b", "TRUE"), ("n", "10"), ("x", "ten")]);
        assert!(props.get_as_bool("b").unwrap());
        assert_eq!(props.get_as_u32("n").unwrap(), 10);
        assert_eq!(props.get_as_u64("n").unwrap(), 10);
        assert!(props.get_as_u32("x").is_err());
        assert!(props.get_as_bool("x").is_err());
    }

    #[test]
    fn user_specific_properties_merge() {
        let mut props = ConfigProperties::from_pairs([("custom", "bla")]);
        props.apply_user_specific(&ConfigProperties::from_pairs([("userSpecific", "userBla")]));
        assert_eq!(props.get_property("custom").unwrap(), "bla");
        assert_eq!(props.get_property("userSpecific").unwrap(), "userBla");
    }

    #[test]
    fn default_tm_unique_name_does_not_override_custom_setting() {
        assert!(!ConfigProperties::new().tm_unique_name().is_empty());
        let props = ConfigProperties::from_pairs([(TM_UNIQUE_NAME, "bla")]);
        assert_eq!(props.tm_unique_name(), "bla");
    }

    #[test]
    fn config_from_properties() {
        let props = ConfigProperties::from_pairs([
            (LOG_BASE_DIR, "/tmp/logs"),
            (LOG_BASE_NAME, "orders"),
            (TM_UNIQUE_NAME, "tm-orders"),
            (MAX_INDOUBT_TICKS, "12"),
            (PREFER_HEURISTIC_COMMIT, "true"),
            (THREADED_2PC, "true"),
            (TICK_INTERVAL_MS, "250"),
        ]);
        let config = Config::from_properties(&props).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.log_base_name, "orders");
        assert_eq!(config.tm_unique_name, "tm-orders");
        assert_eq!(config.max_indoubt_ticks, 12);
        assert_eq!(config.timeout_ticks, 10);
        assert!(config.prefer_heuristic_commit);
        assert!(config.concurrent_dispatch);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
    }

    #[test]
    fn config_from_properties_validates() {
        let props = ConfigProperties::from_pairs([(MAX_INDOUBT_TICKS, "0")]);
        assert!(Config::from_properties(&props).is_err());
    }
}
