use std::{
    io,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use guildkeep_format::{decode_document, encode_document, CollectionKind};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use super::{
    errors::StorageError,
    metrics::{record_storage_operation, OUTCOME_ERROR, OUTCOME_OK},
};

const MAX_BACKUP_LABEL_CHARS: usize = 64;
/// Leaves room for `-` and a 26-character ULID.
pub(crate) const MAX_BACKUP_PREFIX_CHARS: usize = MAX_BACKUP_LABEL_CHARS - 27;

/// Crash-safe persistence for one whole collection.
#[async_trait]
pub trait StorageStrategy<T: Send + Sync>: Send + Sync + 'static {
    /// Canonical location of the durable state, for diagnostics.
    fn location(&self) -> &Path;

    /// Load the durable state, or `T::default()` if nothing was saved yet.
    async fn load(&self) -> Result<T, StorageError>;

    /// Replace the durable state. Either the old or the new state survives a crash.
    async fn save(&self, value: &T) -> Result<(), StorageError>;

    /// Copy the durable state to a side file labelled `name`, or a fresh
    /// time-sortable label when `name` is `None`.
    async fn backup(&self, name: Option<&str>) -> Result<PathBuf, StorageError>;
}

/// JSON document storage: `<data_dir>/<kind>.json`, staged through
/// `<kind>.json.tmp` and renamed into place.
#[derive(Debug)]
pub struct JsonFileStorage<T> {
    kind: CollectionKind,
    path: PathBuf,
    staging_path: PathBuf,
    backup_dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStorage<T> {
    #[must_use]
    pub fn new(kind: CollectionKind, data_dir: &Path, backup_dir: &Path) -> Self {
        let path = data_dir.join(format!("{kind}.json"));
        let staging_path = data_dir.join(format!("{kind}.json.tmp"));
        Self {
            kind,
            path,
            staging_path,
            backup_dir: backup_dir.to_path_buf(),
            _marker: PhantomData,
        }
    }

    /// Write `bytes` to the staging file and flush it to disk.
    async fn stage(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let write_failed = |source| StorageError::WriteFailed {
            path: self.staging_path.clone(),
            source,
        };
        if let Some(parent) = self.staging_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        write_synced(&self.staging_path, bytes)
            .await
            .map_err(write_failed)
    }

    /// Atomically replace the canonical file with the staged one and make
    /// the rename itself durable.
    async fn commit(&self) -> Result<(), StorageError> {
        let write_failed = |source| StorageError::WriteFailed {
            path: self.path.clone(),
            source,
        };
        tokio::fs::rename(&self.staging_path, &self.path)
            .await
            .map_err(write_failed)?;
        sync_parent_dir(&self.path).await.map_err(write_failed)
    }

    async fn discard_staged(&self) {
        remove_staged(&self.staging_path).await;
    }

    fn backup_path(&self, label: &str) -> PathBuf {
        self.backup_dir.join(format!("{}-{label}.json", self.kind))
    }
}

#[async_trait]
impl<T> StorageStrategy<T> for JsonFileStorage<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    fn location(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<T, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(
                    event = "storage.load",
                    outcome = "absent",
                    collection = %self.kind
                );
                return Ok(T::default());
            }
            Err(source) => {
                record_storage_operation(self.kind.as_str(), "load", OUTCOME_ERROR);
                return Err(StorageError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let value = decode_document(&self.kind, &bytes).map_err(|error| {
            record_storage_operation(self.kind.as_str(), "load", OUTCOME_ERROR);
            StorageError::Corrupt {
                path: self.path.clone(),
                reason: error.to_string(),
            }
        })?;
        record_storage_operation(self.kind.as_str(), "load", OUTCOME_OK);
        tracing::info!(
            event = "storage.load",
            outcome = "loaded",
            collection = %self.kind,
            bytes = bytes.len()
        );
        Ok(value)
    }

    async fn save(&self, value: &T) -> Result<(), StorageError> {
        let result = async {
            let encoded =
                encode_document(&self.kind, value).map_err(|error| StorageError::WriteFailed {
                    path: self.path.clone(),
                    source: io::Error::new(io::ErrorKind::InvalidData, error),
                })?;
            if let Err(error) = self.stage(&encoded).await {
                self.discard_staged().await;
                return Err(error);
            }
            if let Err(error) = self.commit().await {
                self.discard_staged().await;
                return Err(error);
            }
            Ok(encoded.len())
        }
        .await;

        match result {
            Ok(bytes) => {
                record_storage_operation(self.kind.as_str(), "save", OUTCOME_OK);
                tracing::debug!(event = "storage.save", outcome = "committed", collection = %self.kind, bytes);
                Ok(())
            }
            Err(error) => {
                record_storage_operation(self.kind.as_str(), "save", OUTCOME_ERROR);
                tracing::error!(event = "storage.save", outcome = "failed", collection = %self.kind, %error);
                Err(error)
            }
        }
    }

    async fn backup(&self, name: Option<&str>) -> Result<PathBuf, StorageError> {
        let backup_failed = |path: &Path, reason: String| StorageError::BackupFailed {
            path: path.to_path_buf(),
            reason,
        };

        let label = match name {
            Some(name) => {
                validate_backup_label(name)
                    .map_err(|()| backup_failed(&self.path, format!("invalid backup name {name:?}")))?;
                name.to_owned()
            }
            None => Ulid::new().to_string(),
        };
        let target = self.backup_path(&label);
        let staging = self.backup_dir.join(format!("{}-{label}.json.tmp", self.kind));

        let result = async {
            let bytes = tokio::fs::read(&self.path)
                .await
                .map_err(|error| backup_failed(&self.path, error.to_string()))?;
            tokio::fs::create_dir_all(&self.backup_dir)
                .await
                .map_err(|error| backup_failed(&self.backup_dir, error.to_string()))?;
            write_synced(&staging, &bytes)
                .await
                .map_err(|error| backup_failed(&staging, error.to_string()))?;
            tokio::fs::rename(&staging, &target)
                .await
                .map_err(|error| backup_failed(&target, error.to_string()))?;
            sync_parent_dir(&target)
                .await
                .map_err(|error| backup_failed(&self.backup_dir, error.to_string()))
        }
        .await;

        match result {
            Ok(()) => {
                record_storage_operation(self.kind.as_str(), "backup", OUTCOME_OK);
                tracing::info!(
                    event = "storage.backup",
                    outcome = "written",
                    collection = %self.kind,
                    path = %target.display()
                );
                Ok(target)
            }
            Err(error) => {
                remove_staged(&staging).await;
                record_storage_operation(self.kind.as_str(), "backup", OUTCOME_ERROR);
                tracing::error!(event = "storage.backup", outcome = "failed", collection = %self.kind, %error);
                Err(error)
            }
        }
    }
}

/// Flush the directory entry of `path` so a completed rename survives power loss.
async fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

async fn remove_staged(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                event = "storage.discard_staged",
                outcome = "failed",
                path = %path.display(),
                %error
            );
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Checks that `<prefix>-<ulid>` will be a valid backup label.
pub(crate) fn validate_backup_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() || prefix.len() > MAX_BACKUP_PREFIX_CHARS {
        return Err(format!(
            "backup prefix must be 1..={MAX_BACKUP_PREFIX_CHARS} characters"
        ));
    }
    validate_backup_label(prefix)
        .map_err(|()| String::from("backup prefix may only contain [A-Za-z0-9_-]"))
}

fn validate_backup_label(value: &str) -> Result<(), ()> {
    if !(1..=MAX_BACKUP_LABEL_CHARS).contains(&value.len()) {
        return Err(());
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Ok(());
    }
    Err(())
}
