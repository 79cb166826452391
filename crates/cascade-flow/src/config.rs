//! Runtime configuration for the streaming service.
//!
//! Limits are explicit and loadable from the process environment through
//! a test-friendly lookup function, with strict validation: a present
//! but malformed value is a configuration error, not a silent default.

use crate::error::{Error, Result};

const ENV_PARALLEL_SUB_REQUESTS: &str = "CASCADE_FLOW_PARALLEL_SUB_REQUESTS";
const ENV_BLOCK_RANGE_SIZE_SUB_REQUESTS: &str = "CASCADE_FLOW_BLOCK_RANGE_SIZE_SUB_REQUESTS";
const ENV_STORE_SNAPSHOTS_SAVE_INTERVAL: &str = "CASCADE_FLOW_STORE_SNAPSHOTS_SAVE_INTERVAL";
const ENV_WORK_UNIT_MAX_ATTEMPTS: &str = "CASCADE_FLOW_WORK_UNIT_MAX_ATTEMPTS";
const ENV_PARTIAL_MODE_ENABLED: &str = "CASCADE_FLOW_PARTIAL_MODE_ENABLED";

const DEFAULT_PARALLEL_SUB_REQUESTS: u64 = 4;
const DEFAULT_BLOCK_RANGE_SIZE_SUB_REQUESTS: u64 = 1_000;
const DEFAULT_STORE_SNAPSHOTS_SAVE_INTERVAL: u64 = 1_000;
const DEFAULT_WORK_UNIT_MAX_ATTEMPTS: u64 = 3;

/// Runtime limits for one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum concurrent in-flight work units.
    pub parallel_sub_requests: u64,
    /// Maximum block span of one work unit.
    pub block_range_size_sub_requests: u64,
    /// Store snapshots are written at multiples of this interval.
    pub store_snapshots_save_interval: u64,
    /// Attempts per work unit before the request aborts.
    pub work_unit_max_attempts: u64,
    /// Whether this instance accepts sub-requests.
    pub partial_mode_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel_sub_requests: DEFAULT_PARALLEL_SUB_REQUESTS,
            block_range_size_sub_requests: DEFAULT_BLOCK_RANGE_SIZE_SUB_REQUESTS,
            store_snapshots_save_interval: DEFAULT_STORE_SNAPSHOTS_SAVE_INTERVAL,
            work_unit_max_attempts: DEFAULT_WORK_UNIT_MAX_ATTEMPTS,
            partial_mode_enabled: false,
        }
    }
}

impl RuntimeConfig {
    /// Loads runtime config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error when a value is present but not
    /// a positive integer (or, for the partial-mode flag, not a boolean).
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads runtime config with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error when a value is present but not
    /// a positive integer (or, for the partial-mode flag, not a boolean).
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            parallel_sub_requests: limit_setting(
                &get_env,
                ENV_PARALLEL_SUB_REQUESTS,
                DEFAULT_PARALLEL_SUB_REQUESTS,
            )?,
            block_range_size_sub_requests: limit_setting(
                &get_env,
                ENV_BLOCK_RANGE_SIZE_SUB_REQUESTS,
                DEFAULT_BLOCK_RANGE_SIZE_SUB_REQUESTS,
            )?,
            store_snapshots_save_interval: limit_setting(
                &get_env,
                ENV_STORE_SNAPSHOTS_SAVE_INTERVAL,
                DEFAULT_STORE_SNAPSHOTS_SAVE_INTERVAL,
            )?,
            work_unit_max_attempts: limit_setting(
                &get_env,
                ENV_WORK_UNIT_MAX_ATTEMPTS,
                DEFAULT_WORK_UNIT_MAX_ATTEMPTS,
            )?,
            partial_mode_enabled: flag_setting(&get_env, ENV_PARTIAL_MODE_ENABLED, false)?,
        })
    }
}

/// Reads a limit (a positive block count or attempt count) from the
/// environment, falling back to `default` when the key is unset.
fn limit_setting<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(Error::invalid_argument(format!(
                "{key}: expected a positive integer, got {raw:?}"
            ))),
        },
    }
}

/// Reads an on/off switch from the environment, falling back to
/// `default` when the key is unset.
fn flag_setting<F>(get_env: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(raw) => Err(Error::invalid_argument(format!(
            "{key}: expected true or false, got {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = RuntimeConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn values_load_from_env() {
        let config = RuntimeConfig::from_env_with(|key| match key {
            ENV_PARALLEL_SUB_REQUESTS => Some("8".into()),
            ENV_BLOCK_RANGE_SIZE_SUB_REQUESTS => Some("200".into()),
            ENV_PARTIAL_MODE_ENABLED => Some("true".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.parallel_sub_requests, 8);
        assert_eq!(config.block_range_size_sub_requests, 200);
        assert!(config.partial_mode_enabled);
    }

    #[test]
    fn zero_is_rejected() {
        let err = RuntimeConfig::from_env_with(|key| {
            (key == ENV_PARALLEL_SUB_REQUESTS).then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = RuntimeConfig::from_env_with(|key| {
            (key == ENV_STORE_SNAPSHOTS_SAVE_INTERVAL).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn bad_bool_is_rejected() {
        let err = RuntimeConfig::from_env_with(|key| {
            (key == ENV_PARTIAL_MODE_ENABLED).then(|| "yes".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("true or false"));
    }
}
