use std::{path::PathBuf, sync::Arc};

use guildkeep_core::{GuildId, PermissionNode, RoleId, UserId};
use guildkeep_format::CollectionKind;
use tokio::task::JoinHandle;

use super::{
    authorize::Authorizer,
    cache::PermissionCache,
    core::{EnvSource, ServiceConfig, GUILD_SETTINGS_COLLECTION, PERMISSION_GROUPS_COLLECTION},
    errors::{BackupFailure, ConfigError, StorageError},
    permissions::{PermissionGraphs, PermissionRepository},
    settings::{GuildSettingsMap, GuildSettingsRepository},
    storage::{validate_backup_prefix, JsonFileStorage},
};

/// Entry point for the command and logging layers.
pub struct ConfigurationService {
    config: ServiceConfig,
    settings: Arc<GuildSettingsRepository>,
    permissions: Arc<PermissionRepository>,
    authorizer: Arc<Authorizer>,
    env: Arc<dyn EnvSource>,
}

impl ConfigurationService {
    /// Opens both collections under `config.data_dir`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Storage`] if either collection is corrupt or unreadable.
    pub async fn open(config: ServiceConfig, env: Arc<dyn EnvSource>) -> Result<Self, ConfigError> {
        let settings_storage = Arc::new(JsonFileStorage::<GuildSettingsMap>::new(
            collection_kind(GUILD_SETTINGS_COLLECTION)?,
            &config.data_dir,
            &config.backup_dir,
        ));
        let permission_storage = Arc::new(JsonFileStorage::<PermissionGraphs>::new(
            collection_kind(PERMISSION_GROUPS_COLLECTION)?,
            &config.data_dir,
            &config.backup_dir,
        ));
        let cache = Arc::new(PermissionCache::new(config.permission_cache_ttl));

        let settings = GuildSettingsRepository::open(settings_storage).await?;
        let permissions = PermissionRepository::open(permission_storage, cache).await?;
        tracing::info!(
            event = "service.open",
            data_dir = %config.data_dir.display(),
            backup_dir = %config.backup_dir.display(),
            cache_ttl_secs = config.permission_cache_ttl.as_secs()
        );
        Ok(Self::from_parts(config, settings, permissions, env))
    }

    #[must_use]
    pub fn from_parts(
        config: ServiceConfig,
        settings: GuildSettingsRepository,
        permissions: PermissionRepository,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        let permissions = Arc::new(permissions);
        let authorizer = Arc::new(Authorizer::new(Arc::clone(&permissions)));
        Self {
            config,
            settings: Arc::new(settings),
            permissions,
            authorizer,
            env,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<GuildSettingsRepository> {
        &self.settings
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionRepository> {
        &self.permissions
    }

    #[must_use]
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    pub async fn has_permission(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
        required: &PermissionNode,
    ) -> bool {
        self.authorizer
            .has_permission(guild_id, user_id, roles, required)
            .await
    }

    /// Reads a secret (bot token, API key) through the configured env source.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<String> {
        self.env.var(key).filter(|value| !value.is_empty())
    }

    /// Starts the background cache sweep if one is configured.
    #[must_use]
    pub fn spawn_cache_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.cache_sweep_interval?;
        Some(Arc::clone(self.permissions.cache()).spawn_sweeper(interval))
    }

    /// Backs up every collection. Completed backups are kept even when another fails.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBackupPrefix`] before writing anything if
    /// `prefix` cannot form a backup label, or
    /// [`ConfigError::PartialBackupFailure`] listing completed and failed
    /// collections if any backup fails.
    pub async fn backup_all(&self, prefix: Option<&str>) -> Result<Vec<PathBuf>, ConfigError> {
        if let Some(prefix) = prefix {
            validate_backup_prefix(prefix).map_err(|reason| ConfigError::InvalidBackupPrefix {
                prefix: prefix.to_owned(),
                reason,
            })?;
        }
        let (settings, permissions) = tokio::join!(
            self.settings.backup(prefix),
            self.permissions.backup(prefix)
        );

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for (collection, result) in [
            (GUILD_SETTINGS_COLLECTION, settings),
            (PERMISSION_GROUPS_COLLECTION, permissions),
        ] {
            match result {
                Ok(path) => completed.push(path),
                Err(error) => failed.push(BackupFailure { collection, error }),
            }
        }

        if failed.is_empty() {
            tracing::info!(event = "service.backup_all", outcome = "ok", files = completed.len());
            return Ok(completed);
        }
        tracing::warn!(
            event = "service.backup_all",
            outcome = "partial",
            completed = completed.len(),
            failed = failed.len()
        );
        Err(ConfigError::PartialBackupFailure { completed, failed })
    }
}

fn collection_kind(name: &str) -> Result<CollectionKind, StorageError> {
    CollectionKind::try_from(name).map_err(|error| StorageError::Corrupt {
        path: PathBuf::from(name),
        reason: error.to_string(),
    })
}
