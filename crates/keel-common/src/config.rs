//! Polling policy configuration
//!
//! Every wait in the suite runs under a [`RetryPolicy`]: a total timeout and
//! the sleep between probes. [`PolicyConfig`] groups the policies for each
//! wait the backup workflows perform, with defaults matching how long the
//! control plane normally takes. Values can come from a JSON document or be
//! overridden through `KEEL_*` environment variables.
//!
//! # Environment Variables
//!
//! ```bash
//! KEEL_BACKUP_CREATION_TIMEOUT_SECS=2400
//! KEEL_BACKUP_CREATION_INTERVAL_SECS=30
//! KEEL_RESTORE_IN_PROGRESS_TIMEOUT_SECS=600
//! KEEL_MAX_PARALLEL_TASKS=4
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, ENV_PREFIX};

/// Timeout and retry interval for one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    timeout: Duration,
    interval: Duration,
}

impl RetryPolicy {
    /// Create a policy, rejecting an interval longer than the timeout
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        if interval > timeout {
            return Err(Error::config(format!(
                "retry interval {:?} exceeds timeout {:?}",
                interval, timeout
            )));
        }
        Ok(Self { timeout, interval })
    }

    /// Total time a poll may run
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sleep between two probes
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Serialized form of a [`RetryPolicy`]
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySettings {
    /// Total timeout in seconds
    pub timeout_secs: u64,
    /// Interval between probes in seconds
    pub interval_secs: u64,
}

impl PolicySettings {
    /// Create settings from whole seconds
    pub const fn from_secs(timeout_secs: u64, interval_secs: u64) -> Self {
        Self {
            timeout_secs,
            interval_secs,
        }
    }

    /// Convert into a validated [`RetryPolicy`]
    pub fn policy(&self) -> Result<RetryPolicy> {
        if self.timeout_secs == 0 {
            return Err(Error::config("timeout must be greater than zero"));
        }
        RetryPolicy::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_secs(self.interval_secs),
        )
    }
}

/// Default backup creation wait (40 minutes, every 30 seconds)
pub const DEFAULT_BACKUP_CREATION: PolicySettings = PolicySettings::from_secs(40 * 60, 30);
/// Default backup deletion wait (20 minutes, every 30 seconds)
pub const DEFAULT_BACKUP_DELETION: PolicySettings = PolicySettings::from_secs(20 * 60, 30);
/// Default restore creation wait (40 minutes, every 30 seconds)
pub const DEFAULT_RESTORE_CREATION: PolicySettings = PolicySettings::from_secs(40 * 60, 30);
/// Default restore deletion wait (20 minutes, every 30 seconds)
pub const DEFAULT_RESTORE_DELETION: PolicySettings = PolicySettings::from_secs(20 * 60, 30);
/// Default schedule deletion wait (20 minutes, every 30 seconds)
pub const DEFAULT_SCHEDULE_DELETION: PolicySettings = PolicySettings::from_secs(20 * 60, 30);
/// Default wait for a restore to be observed in progress (10 minutes, every 5 seconds)
pub const DEFAULT_RESTORE_IN_PROGRESS: PolicySettings = PolicySettings::from_secs(10 * 60, 5);
/// Default cap on concurrently running batch tasks
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 4;

/// Policies for every wait the backup workflows perform
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    /// Wait for a backup to finish
    pub backup_creation: PolicySettings,
    /// Wait for a backup to disappear after deletion
    pub backup_deletion: PolicySettings,
    /// Wait for a restore to finish
    pub restore_creation: PolicySettings,
    /// Wait for a restore to disappear after deletion
    pub restore_deletion: PolicySettings,
    /// Wait for a backup schedule to disappear after deletion
    pub schedule_deletion: PolicySettings,
    /// Wait for a restore to be observed running
    pub restore_in_progress: PolicySettings,
    /// Cap on concurrently running batch tasks
    pub max_parallel_tasks: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            backup_creation: DEFAULT_BACKUP_CREATION,
            backup_deletion: DEFAULT_BACKUP_DELETION,
            restore_creation: DEFAULT_RESTORE_CREATION,
            restore_deletion: DEFAULT_RESTORE_DELETION,
            schedule_deletion: DEFAULT_SCHEDULE_DELETION,
            restore_in_progress: DEFAULT_RESTORE_IN_PROGRESS,
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
        }
    }
}

impl PolicyConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(body: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(body)
            .map_err(|e| Error::config(format!("failed to parse policy config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `KEEL_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides read through `lookup`
    ///
    /// Split out from [`PolicyConfig::from_env`] so overrides can be tested
    /// without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        for (name, settings) in config.settings_mut() {
            let prefix = format!("{}_{}", ENV_PREFIX, name.to_uppercase());
            if let Some(secs) = parse_override(&lookup, &format!("{prefix}_TIMEOUT_SECS"))? {
                settings.timeout_secs = secs;
            }
            if let Some(secs) = parse_override(&lookup, &format!("{prefix}_INTERVAL_SECS"))? {
                settings.interval_secs = secs;
            }
        }
        let key = format!("{ENV_PREFIX}_MAX_PARALLEL_TASKS");
        if let Some(max) = parse_override::<usize>(&lookup, &key)? {
            config.max_parallel_tasks = max;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every policy and the parallelism cap
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in self.settings() {
            settings
                .policy()
                .map_err(|e| Error::config(format!("{name}: {e}")))?;
        }
        if self.max_parallel_tasks == 0 {
            return Err(Error::config("max_parallel_tasks must be at least 1"));
        }
        Ok(())
    }

    fn settings(&self) -> [(&'static str, &PolicySettings); 6] {
        [
            ("backup_creation", &self.backup_creation),
            ("backup_deletion", &self.backup_deletion),
            ("restore_creation", &self.restore_creation),
            ("restore_deletion", &self.restore_deletion),
            ("schedule_deletion", &self.schedule_deletion),
            ("restore_in_progress", &self.restore_in_progress),
        ]
    }

    fn settings_mut(&mut self) -> [(&'static str, &mut PolicySettings); 6] {
        [
            ("backup_creation", &mut self.backup_creation),
            ("backup_deletion", &mut self.backup_deletion),
            ("restore_creation", &mut self.restore_creation),
            ("restore_deletion", &mut self.restore_deletion),
            ("schedule_deletion", &mut self.schedule_deletion),
            ("restore_in_progress", &mut self.restore_in_progress),
        ]
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("{key}={raw:?} is not a whole number: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PolicyConfig::default();
        config.validate().unwrap();
        let policy = config.backup_creation.policy().unwrap();
        assert_eq!(policy.timeout(), Duration::from_secs(2400));
        assert_eq!(policy.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_rejects_interval_longer_than_timeout() {
        let err = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("exceeds timeout"));
    }

    #[test]
    fn test_retry_policy_allows_equal_interval_and_timeout() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap();
        assert_eq!(policy.interval(), policy.timeout());
    }

    #[test]
    fn test_env_overrides_apply_per_wait() {
        let config = PolicyConfig::from_lookup(lookup_from(&[
            ("KEEL_RESTORE_CREATION_TIMEOUT_SECS", "120"),
            ("KEEL_RESTORE_CREATION_INTERVAL_SECS", " 2 "),
            ("KEEL_MAX_PARALLEL_TASKS", "8"),
        ]))
        .unwrap();
        assert_eq!(config.restore_creation, PolicySettings::from_secs(120, 2));
        assert_eq!(config.backup_creation, DEFAULT_BACKUP_CREATION);
        assert_eq!(config.max_parallel_tasks, 8);
    }

    #[test]
    fn test_malformed_env_override_is_a_config_error() {
        let err =
            PolicyConfig::from_lookup(lookup_from(&[("KEEL_BACKUP_DELETION_TIMEOUT_SECS", "soon")]))
                .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("KEEL_BACKUP_DELETION_TIMEOUT_SECS"));
    }

    #[test]
    fn test_env_override_that_breaks_invariant_is_rejected() {
        let err = PolicyConfig::from_lookup(lookup_from(&[
            ("KEEL_SCHEDULE_DELETION_TIMEOUT_SECS", "10"),
            ("KEEL_SCHEDULE_DELETION_INTERVAL_SECS", "60"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("schedule_deletion"));
    }

    #[test]
    fn test_parallelism_override_outside_usize_is_rejected() {
        let too_big = format!("{}0", usize::MAX);
        let err = PolicyConfig::from_lookup(lookup_from(&[(
            "KEEL_MAX_PARALLEL_TASKS",
            too_big.as_str(),
        )]))
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("KEEL_MAX_PARALLEL_TASKS"));

        let config = PolicyConfig::from_lookup(lookup_from(&[(
            "KEEL_MAX_PARALLEL_TASKS",
            usize::MAX.to_string().as_str(),
        )]))
        .unwrap();
        assert_eq!(config.max_parallel_tasks, usize::MAX);
    }

    #[test]
    fn test_json_fills_missing_fields_with_defaults() {
        let config = PolicyConfig::from_json(
            r#"{"backupCreation": {"timeoutSecs": 60, "intervalSecs": 1}, "maxParallelTasks": 2}"#,
        )
        .unwrap();
        assert_eq!(config.backup_creation, PolicySettings::from_secs(60, 1));
        assert_eq!(config.restore_deletion, DEFAULT_RESTORE_DELETION);
        assert_eq!(config.max_parallel_tasks, 2);
    }

    #[test]
    fn test_json_with_zero_parallelism_is_rejected() {
        let err = PolicyConfig::from_json(r#"{"maxParallelTasks": 0}"#).unwrap_err();
        assert!(err.to_string().contains("max_parallel_tasks"));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(PolicySettings::from_secs(0, 0).policy().is_err());
    }
}
