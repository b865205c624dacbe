pub(crate) mod authorize;
pub(crate) mod cache;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod facade;
pub(crate) mod metrics;
pub(crate) mod permissions;
pub(crate) mod settings;
pub(crate) mod storage;
#[cfg(test)]
pub(crate) mod test_support;

pub use authorize::Authorizer;
pub use cache::{CacheKey, CacheStats, CachedPermissionSet, PermissionCache, RoleFingerprint};
pub use self::core::{
    EnvSource, ProcessEnv, ServiceConfig, DEFAULT_BACKUP_DIR_NAME,
    DEFAULT_CACHE_SWEEP_INTERVAL_SECS, DEFAULT_DATA_DIR, DEFAULT_PERMISSION_CACHE_TTL_SECS,
    ENV_BACKUP_DIR, ENV_BACKUP_PREFIX, ENV_CACHE_SWEEP_INTERVAL_SECS, ENV_DATA_DIR,
    ENV_PERMISSION_CACHE_TTL_SECS, GUILD_SETTINGS_COLLECTION, PERMISSION_GROUPS_COLLECTION,
};
pub use errors::{
    init_tracing, BackupFailure, ConfigError, PermissionError, SettingsError, StorageError,
};
pub use facade::ConfigurationService;
pub use metrics::render_metrics;
pub use permissions::{PermissionGraphs, PermissionRepository};
pub use settings::{GuildSettingsMap, GuildSettingsRepository};
pub use storage::{JsonFileStorage, StorageStrategy};
