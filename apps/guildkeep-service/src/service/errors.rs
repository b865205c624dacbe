use std::{io, path::PathBuf};

use guildkeep_core::{GraphError, GroupId};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("stored collection at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to back up {path}: {reason}")]
    BackupFailed { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("permission group {0} not found")]
    GroupNotFound(GroupId),
    #[error("permission group {0} already exists")]
    GroupAlreadyExists(GroupId),
    #[error("permission group {0} cannot inherit from itself")]
    SelfInheritance(GroupId),
    #[error("inheriting {group} from {parent} would create a cycle")]
    InheritanceCycle { group: GroupId, parent: GroupId },
    #[error("guild already has the maximum of {max} permission groups")]
    GroupLimitReached { max: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<GraphError> for PermissionError {
    fn from(value: GraphError) -> Self {
        match value {
            GraphError::GroupNotFound(id) => Self::GroupNotFound(id),
            GraphError::GroupAlreadyExists(id) => Self::GroupAlreadyExists(id),
            GraphError::SelfInheritance(id) => Self::SelfInheritance(id),
            GraphError::InheritanceCycle { group, parent } => {
                Self::InheritanceCycle { group, parent }
            }
            GraphError::GroupLimitReached { max } => Self::GroupLimitReached { max },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One collection whose backup did not complete.
#[derive(Debug)]
pub struct BackupFailure {
    pub collection: &'static str,
    pub error: StorageError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid backup prefix {prefix:?}: {reason}")]
    InvalidBackupPrefix { prefix: String, reason: String },
    #[error("backup failed for {}", describe_failures(.failed))]
    PartialBackupFailure {
        completed: Vec<PathBuf>,
        failed: Vec<BackupFailure>,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn describe_failures(failed: &[BackupFailure]) -> String {
    failed
        .iter()
        .map(|failure| format!("{} ({})", failure.collection, failure.error))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
