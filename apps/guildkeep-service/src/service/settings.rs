use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use guildkeep_core::{GuildId, GuildSettings};
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use super::{
    errors::{SettingsError, StorageError},
    storage::StorageStrategy,
};

pub type GuildSettingsMap = BTreeMap<GuildId, Arc<GuildSettings>>;

/// Per-guild settings persisted as one collection. Guilds without stored
/// settings read as [`GuildSettings::default`].
pub struct GuildSettingsRepository {
    storage: Arc<dyn StorageStrategy<GuildSettingsMap>>,
    settings: RwLock<Arc<GuildSettingsMap>>,
    writer: Mutex<()>,
}

impl GuildSettingsRepository {
    /// # Errors
    /// Returns [`StorageError::Corrupt`] if the stored document cannot be decoded.
    pub async fn open(
        storage: Arc<dyn StorageStrategy<GuildSettingsMap>>,
    ) -> Result<Self, StorageError> {
        let settings = storage.load().await?;
        tracing::info!(
            event = "settings.open",
            guilds = settings.len(),
            path = %storage.location().display()
        );
        Ok(Self {
            storage,
            settings: RwLock::new(Arc::new(settings)),
            writer: Mutex::new(()),
        })
    }

    pub async fn get(&self, guild_id: GuildId) -> Arc<GuildSettings> {
        self.settings
            .read()
            .await
            .get(&guild_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Applies `mutator` to the guild's settings, persists the whole
    /// collection and returns the updated value. Settings left empty are
    /// dropped from storage.
    ///
    /// # Errors
    /// Returns [`SettingsError::Storage`] if the save fails; the previous
    /// settings stay visible.
    pub async fn update<F>(&self, guild_id: GuildId, mutator: F) -> Result<GuildSettings, SettingsError>
    where
        F: FnOnce(&mut GuildSettings),
    {
        let _writer = self.writer.lock().await;
        let current = Arc::clone(&*self.settings.read().await);
        let mut updated = current
            .get(&guild_id)
            .map(|settings| (**settings).clone())
            .unwrap_or_default();
        mutator(&mut updated);

        let mut next = (*current).clone();
        if updated.is_empty() {
            next.remove(&guild_id);
        } else {
            next.insert(guild_id, Arc::new(updated.clone()));
        }
        self.storage.save(&next).await?;
        *self.settings.write().await = Arc::new(next);
        tracing::info!(event = "settings.update", outcome = "applied", guild_id = %guild_id);
        Ok(updated)
    }

    /// Forgets the guild's settings. Returns `false` if none were stored.
    ///
    /// # Errors
    /// Returns [`SettingsError::Storage`] if the save fails.
    pub async fn reset(&self, guild_id: GuildId) -> Result<bool, SettingsError> {
        let _writer = self.writer.lock().await;
        let current = Arc::clone(&*self.settings.read().await);
        if !current.contains_key(&guild_id) {
            return Ok(false);
        }
        let mut next = (*current).clone();
        next.remove(&guild_id);
        self.storage.save(&next).await?;
        *self.settings.write().await = Arc::new(next);
        tracing::info!(event = "settings.reset", outcome = "applied", guild_id = %guild_id);
        Ok(true)
    }

    /// Guilds with stored settings, in id order.
    pub async fn guilds(&self) -> Vec<GuildId> {
        self.settings.read().await.keys().copied().collect()
    }

    /// # Errors
    /// [`StorageError::BackupFailed`] if nothing was saved yet or the copy fails.
    pub async fn backup(&self, prefix: Option<&str>) -> Result<PathBuf, StorageError> {
        let label = prefix.map(|prefix| format!("{prefix}-{}", Ulid::new()));
        self.storage.backup(label.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::{GuildSettingsMap, GuildSettingsRepository};
    use crate::service::{
        errors::SettingsError, storage::JsonFileStorage, test_support::FlakyStorage,
    };
    use guildkeep_core::{ChannelId, GuildId, LogEvent, RoleId};
    use guildkeep_format::CollectionKind;
    use std::{collections::BTreeMap, sync::Arc};
    use tempfile::TempDir;

    fn guild(value: u64) -> GuildId {
        GuildId::try_from(value).unwrap()
    }

    fn channel(value: u64) -> ChannelId {
        ChannelId::try_from(value).unwrap()
    }

    fn file_storage(dir: &TempDir) -> Arc<JsonFileStorage<GuildSettingsMap>> {
        Arc::new(JsonFileStorage::new(
            CollectionKind::try_from("guild_settings").unwrap(),
            dir.path(),
            &dir.path().join("backups"),
        ))
    }

    #[tokio::test]
    async fn unknown_guild_reads_defaults() {
        let dir = TempDir::new().unwrap();
        let repo = GuildSettingsRepository::open(file_storage(&dir)).await.unwrap();
        let settings = repo.get(guild(1)).await;
        assert!(settings.is_empty());
        assert_eq!(settings.log_channel_for(LogEvent::MemberJoin), None);
        assert!(repo.guilds().await.is_empty());
    }

    #[tokio::test]
    async fn update_persists_and_round_trips_optional_collections() {
        let dir = TempDir::new().unwrap();
        let repo = GuildSettingsRepository::open(file_storage(&dir)).await.unwrap();

        let updated = repo
            .update(guild(1), |settings| {
                settings.log_channel = Some(channel(10));
                settings.moderation_role = Some(RoleId::try_from(5_u64).unwrap());
                settings.event_log_channels = Some(BTreeMap::new());
            })
            .await
            .unwrap();
        assert_eq!(updated.log_channel, Some(channel(10)));

        let reopened = GuildSettingsRepository::open(file_storage(&dir)).await.unwrap();
        let settings = reopened.get(guild(1)).await;
        assert_eq!(*settings, updated);
        assert_eq!(settings.event_log_channels, Some(BTreeMap::new()));
        assert_eq!(settings.pinned_panels, None);
        assert_eq!(reopened.guilds().await, vec![guild(1)]);
    }

    #[tokio::test]
    async fn emptied_settings_and_reset_drop_the_guild() {
        let dir = TempDir::new().unwrap();
        let repo = GuildSettingsRepository::open(file_storage(&dir)).await.unwrap();
        repo.update(guild(1), |settings| settings.welcome_channel = Some(channel(3)))
            .await
            .unwrap();
        repo.update(guild(1), |settings| settings.welcome_channel = None)
            .await
            .unwrap();
        assert!(repo.guilds().await.is_empty());

        repo.update(guild(2), |settings| settings.log_channel = Some(channel(4)))
            .await
            .unwrap();
        assert!(repo.reset(guild(2)).await.unwrap());
        assert!(!repo.reset(guild(2)).await.unwrap());
        assert!(repo.get(guild(2)).await.is_empty());
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_settings() {
        let dir = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyStorage::<GuildSettingsMap>::new(file_storage(&dir)));
        let repo = GuildSettingsRepository::open(flaky.clone()).await.unwrap();
        repo.update(guild(1), |settings| settings.log_channel = Some(channel(10)))
            .await
            .unwrap();

        flaky.fail_saves(true);
        let error = repo
            .update(guild(1), |settings| settings.log_channel = Some(channel(11)))
            .await
            .unwrap_err();
        assert!(matches!(error, SettingsError::Storage(_)));
        assert_eq!(repo.get(guild(1)).await.log_channel, Some(channel(10)));
    }

    #[tokio::test]
    async fn backup_uses_prefix_in_label() {
        let dir = TempDir::new().unwrap();
        let repo = GuildSettingsRepository::open(file_storage(&dir)).await.unwrap();
        repo.update(guild(1), |settings| settings.log_channel = Some(channel(10)))
            .await
            .unwrap();

        let path = repo.backup(Some("nightly")).await.unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("guild_settings-nightly-"));
        assert!(path.exists());
    }
}
