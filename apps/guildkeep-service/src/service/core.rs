use std::{collections::HashMap, path::PathBuf, time::Duration};

use super::{errors::ConfigError, storage::validate_backup_prefix};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_BACKUP_DIR_NAME: &str = "backups";
pub const DEFAULT_PERMISSION_CACHE_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
pub const GUILD_SETTINGS_COLLECTION: &str = "guild_settings";
pub const PERMISSION_GROUPS_COLLECTION: &str = "permission_groups";

pub const ENV_DATA_DIR: &str = "GUILDKEEP_DATA_DIR";
pub const ENV_BACKUP_DIR: &str = "GUILDKEEP_BACKUP_DIR";
pub const ENV_PERMISSION_CACHE_TTL_SECS: &str = "GUILDKEEP_PERMISSION_CACHE_TTL_SECS";
pub const ENV_CACHE_SWEEP_INTERVAL_SECS: &str = "GUILDKEEP_CACHE_SWEEP_INTERVAL_SECS";
pub const ENV_BACKUP_PREFIX: &str = "GUILDKEEP_BACKUP_PREFIX";

/// Read access to environment variables and secrets.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// [`EnvSource`] backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub permission_cache_ttl: Duration,
    /// `None` disables the background sweep; expiry is still enforced on read.
    pub cache_sweep_interval: Option<Duration>,
    /// Label prefix for scheduled backups; `None` labels them with a bare ULID.
    pub backup_prefix: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DEFAULT_DATA_DIR);
        Self {
            backup_dir: data_dir.join(DEFAULT_BACKUP_DIR_NAME),
            data_dir,
            permission_cache_ttl: Duration::from_secs(DEFAULT_PERMISSION_CACHE_TTL_SECS),
            cache_sweep_interval: Some(Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECS)),
            backup_prefix: None,
        }
    }
}

impl ServiceConfig {
    /// Build a config from `GUILDKEEP_*` variables, falling back to defaults.
    ///
    /// A sweep interval of `0` disables the background sweep.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidEnv`] if a numeric variable does not parse,
    /// the cache TTL is zero, or the backup prefix is not a valid label prefix.
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let data_dir = env
            .var(ENV_DATA_DIR)
            .map_or(defaults.data_dir, PathBuf::from);
        let backup_dir = env
            .var(ENV_BACKUP_DIR)
            .map_or_else(|| data_dir.join(DEFAULT_BACKUP_DIR_NAME), PathBuf::from);

        let ttl_secs = parse_secs(env, ENV_PERMISSION_CACHE_TTL_SECS)?
            .unwrap_or(DEFAULT_PERMISSION_CACHE_TTL_SECS);
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidEnv {
                key: ENV_PERMISSION_CACHE_TTL_SECS,
                value: String::from("0"),
                reason: String::from("ttl must be positive"),
            });
        }
        let sweep_secs = parse_secs(env, ENV_CACHE_SWEEP_INTERVAL_SECS)?
            .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS);
        let backup_prefix = env
            .var(ENV_BACKUP_PREFIX)
            .filter(|value| !value.is_empty());
        if let Some(prefix) = &backup_prefix {
            validate_backup_prefix(prefix).map_err(|reason| ConfigError::InvalidEnv {
                key: ENV_BACKUP_PREFIX,
                value: prefix.clone(),
                reason,
            })?;
        }

        Ok(Self {
            data_dir,
            backup_dir,
            permission_cache_ttl: Duration::from_secs(ttl_secs),
            cache_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            backup_prefix,
        })
    }
}

fn parse_secs(env: &dyn EnvSource, key: &'static str) -> Result<Option<u64>, ConfigError> {
    env.var(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidEnv {
                    key,
                    reason: e.to_string(),
                    value,
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::{
        ServiceConfig, DEFAULT_PERMISSION_CACHE_TTL_SECS, ENV_BACKUP_DIR, ENV_BACKUP_PREFIX,
        ENV_CACHE_SWEEP_INTERVAL_SECS, ENV_DATA_DIR, ENV_PERMISSION_CACHE_TTL_SECS,
    };
    use crate::service::errors::ConfigError;
    use std::{collections::HashMap, path::PathBuf, time::Duration};

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn empty_env_uses_defaults() {
        let config = ServiceConfig::from_env(&env(&[])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.backup_dir, PathBuf::from("./data/backups"));
        assert_eq!(
            config.permission_cache_ttl,
            Duration::from_secs(DEFAULT_PERMISSION_CACHE_TTL_SECS)
        );
        assert!(config.cache_sweep_interval.is_some());
        assert_eq!(config.backup_prefix, None);
    }

    #[test]
    fn backup_prefix_is_read_and_validated() {
        let config = ServiceConfig::from_env(&env(&[(ENV_BACKUP_PREFIX, "nightly")])).unwrap();
        assert_eq!(config.backup_prefix.as_deref(), Some("nightly"));

        let config = ServiceConfig::from_env(&env(&[(ENV_BACKUP_PREFIX, "")])).unwrap();
        assert_eq!(config.backup_prefix, None);

        let long = "a".repeat(40);
        for bad in ["pre.deploy", long.as_str()] {
            let error = ServiceConfig::from_env(&env(&[(ENV_BACKUP_PREFIX, bad)])).unwrap_err();
            assert!(matches!(
                error,
                ConfigError::InvalidEnv { key: ENV_BACKUP_PREFIX, .. }
            ));
        }
    }

    #[test]
    fn env_overrides_paths_and_durations() {
        let config = ServiceConfig::from_env(&env(&[
            (ENV_DATA_DIR, "/srv/bot"),
            (ENV_PERMISSION_CACHE_TTL_SECS, "30"),
            (ENV_CACHE_SWEEP_INTERVAL_SECS, "0"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/bot"));
        assert_eq!(config.backup_dir, PathBuf::from("/srv/bot/backups"));
        assert_eq!(config.permission_cache_ttl, Duration::from_secs(30));
        assert_eq!(config.cache_sweep_interval, None);

        let config = ServiceConfig::from_env(&env(&[(ENV_BACKUP_DIR, "/mnt/backups")])).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let error =
            ServiceConfig::from_env(&env(&[(ENV_PERMISSION_CACHE_TTL_SECS, "five")])).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidEnv { key: ENV_PERMISSION_CACHE_TTL_SECS, .. }
        ));

        let error =
            ServiceConfig::from_env(&env(&[(ENV_PERMISSION_CACHE_TTL_SECS, "0")])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidEnv { .. }));
    }
}
