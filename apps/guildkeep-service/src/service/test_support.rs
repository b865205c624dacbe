use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;

use super::{errors::StorageError, storage::StorageStrategy};

/// Wraps a real storage and fails saves or backups on demand.
pub(crate) struct FlakyStorage<T> {
    inner: Arc<dyn StorageStrategy<T>>,
    fail_saves: AtomicBool,
    fail_backups: AtomicBool,
}

impl<T: Send + Sync + 'static> FlakyStorage<T> {
    pub(crate) fn new(inner: Arc<dyn StorageStrategy<T>>) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            fail_backups: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_backups(&self, fail: bool) {
        self.fail_backups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> StorageStrategy<T> for FlakyStorage<T> {
    fn location(&self) -> &Path {
        self.inner.location()
    }

    async fn load(&self) -> Result<T, StorageError> {
        self.inner.load().await
    }

    async fn save(&self, value: &T) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                path: self.inner.location().to_path_buf(),
                source: std::io::Error::other("injected save failure"),
            });
        }
        self.inner.save(value).await
    }

    async fn backup(&self, name: Option<&str>) -> Result<PathBuf, StorageError> {
        if self.fail_backups.load(Ordering::SeqCst) {
            return Err(StorageError::BackupFailed {
                path: self.inner.location().to_path_buf(),
                reason: String::from("injected backup failure"),
            });
        }
        self.inner.backup(name).await
    }
}
