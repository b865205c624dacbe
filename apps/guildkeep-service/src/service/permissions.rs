use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use guildkeep_core::{
    GraphError, GroupId, GroupName, GuildGraph, GuildId, PermissionGroup, PermissionNode, RoleId,
};
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use super::{
    cache::PermissionCache,
    errors::{PermissionError, StorageError},
    storage::StorageStrategy,
};

/// Every guild's permission graph, as persisted.
pub type PermissionGraphs = BTreeMap<GuildId, Arc<GuildGraph>>;

/// Guild-scoped permission groups, persisted as one collection.
///
/// Readers clone an `Arc` of the current snapshot. Writers serialize on one
/// mutex, build the next snapshot off to the side, persist it, and only then
/// publish it and invalidate the guild's cached resolutions.
pub struct PermissionRepository {
    storage: Arc<dyn StorageStrategy<PermissionGraphs>>,
    cache: Arc<PermissionCache>,
    graphs: RwLock<Arc<PermissionGraphs>>,
    writer: Mutex<()>,
}

impl PermissionRepository {
    /// Loads every guild graph from `storage`.
    ///
    /// # Errors
    /// Returns [`StorageError::Corrupt`] if the stored document cannot be
    /// decoded or a guild holds two groups with the same id.
    pub async fn open(
        storage: Arc<dyn StorageStrategy<PermissionGraphs>>,
        cache: Arc<PermissionCache>,
    ) -> Result<Self, StorageError> {
        let graphs = storage.load().await?;
        for (guild_id, graph) in &graphs {
            graph.validate().map_err(|error| StorageError::Corrupt {
                path: storage.location().to_path_buf(),
                reason: format!("guild {guild_id}: {error}"),
            })?;
        }
        tracing::info!(
            event = "permissions.open",
            guilds = graphs.len(),
            path = %storage.location().display()
        );
        Ok(Self {
            storage,
            cache,
            graphs: RwLock::new(Arc::new(graphs)),
            writer: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// The guild's current graph. Unknown guilds yield an empty graph.
    pub async fn snapshot(&self, guild_id: GuildId) -> Arc<GuildGraph> {
        self.graphs
            .read()
            .await
            .get(&guild_id)
            .cloned()
            .unwrap_or_default()
    }

    /// # Errors
    /// See [`GuildGraph::create_group`]; storage failures are [`PermissionError::Storage`].
    pub async fn create_group(
        &self,
        guild_id: GuildId,
        id: GroupId,
        name: GroupName,
    ) -> Result<PermissionGroup, PermissionError> {
        self.mutate(guild_id, "create_group", |graph| {
            graph.create_group(id, name).map(|group| (group.clone(), true))
        })
        .await
    }

    /// Deletes a group; its children become roots.
    ///
    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn delete_group(
        &self,
        guild_id: GuildId,
        id: &GroupId,
    ) -> Result<PermissionGroup, PermissionError> {
        self.mutate(guild_id, "delete_group", |graph| {
            graph.delete_group(id).map(|group| (group, true))
        })
        .await
    }

    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn rename_group(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        name: GroupName,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "rename_group", |graph| {
            graph.rename_group(id, name).map(changed)
        })
        .await
    }

    /// Returns `false` if the role was already assigned.
    ///
    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn assign_role(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        role: RoleId,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "assign_role", |graph| {
            graph.assign_role(id, role).map(changed)
        })
        .await
    }

    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn unassign_role(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        role: RoleId,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "unassign_role", |graph| {
            graph.unassign_role(id, role).map(changed)
        })
        .await
    }

    /// Returns `false` if the node was already granted.
    ///
    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn grant_node(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        node: PermissionNode,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "grant_node", |graph| {
            graph.grant_node(id, node).map(changed)
        })
        .await
    }

    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn revoke_node(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        node: &PermissionNode,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "revoke_node", |graph| {
            graph.revoke_node(id, node).map(changed)
        })
        .await
    }

    /// # Errors
    /// [`PermissionError::GroupNotFound`] if either group is absent,
    /// [`PermissionError::SelfInheritance`], [`PermissionError::InheritanceCycle`],
    /// or [`PermissionError::Storage`].
    pub async fn set_inheritance(
        &self,
        guild_id: GuildId,
        id: &GroupId,
        parent: &GroupId,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "set_inheritance", |graph| {
            graph.set_inheritance(id, parent).map(changed)
        })
        .await
    }

    /// # Errors
    /// [`PermissionError::GroupNotFound`] or [`PermissionError::Storage`].
    pub async fn clear_inheritance(
        &self,
        guild_id: GuildId,
        id: &GroupId,
    ) -> Result<bool, PermissionError> {
        self.mutate(guild_id, "clear_inheritance", |graph| {
            graph.clear_inheritance(id).map(changed)
        })
        .await
    }

    /// Groups of the guild in creation order.
    pub async fn list_groups(&self, guild_id: GuildId) -> Vec<PermissionGroup> {
        self.snapshot(guild_id).await.groups().to_vec()
    }

    pub async fn get_group(&self, guild_id: GuildId, id: &GroupId) -> Option<PermissionGroup> {
        self.snapshot(guild_id).await.get(id).cloned()
    }

    /// The group followed by its ancestors, nearest first.
    ///
    /// # Errors
    /// [`PermissionError::GroupNotFound`] if `id` is absent.
    pub async fn inheritance_chain(
        &self,
        guild_id: GuildId,
        id: &GroupId,
    ) -> Result<Vec<GroupId>, PermissionError> {
        Ok(self.snapshot(guild_id).await.inheritance_chain(id)?)
    }

    /// Drops the guild's whole graph. Returns `false` if it had none.
    ///
    /// # Errors
    /// [`PermissionError::Storage`] if the save fails.
    pub async fn purge_guild(&self, guild_id: GuildId) -> Result<bool, PermissionError> {
        let _writer = self.writer.lock().await;
        let current = Arc::clone(&*self.graphs.read().await);
        if !current.contains_key(&guild_id) {
            return Ok(false);
        }
        let mut next = (*current).clone();
        next.remove(&guild_id);
        self.publish(guild_id, "purge_guild", next).await?;
        Ok(true)
    }

    /// Writes a backup labelled `<prefix>-<ulid>`, or a bare ULID without a prefix.
    ///
    /// # Errors
    /// [`StorageError::BackupFailed`] if nothing was saved yet or the copy fails.
    pub async fn backup(&self, prefix: Option<&str>) -> Result<PathBuf, StorageError> {
        let label = prefix.map(|prefix| format!("{prefix}-{}", Ulid::new()));
        self.storage.backup(label.as_deref()).await
    }

    /// Applies `apply` to a copy of the guild's graph. The closure reports its
    /// output and whether the graph changed; unchanged graphs are not saved.
    async fn mutate<R, F>(
        &self,
        guild_id: GuildId,
        operation: &'static str,
        apply: F,
    ) -> Result<R, PermissionError>
    where
        F: FnOnce(&mut GuildGraph) -> Result<(R, bool), GraphError>,
    {
        let _writer = self.writer.lock().await;
        let current = Arc::clone(&*self.graphs.read().await);
        let mut graph = current
            .get(&guild_id)
            .map(|graph| (**graph).clone())
            .unwrap_or_default();

        let (output, changed) = match apply(&mut graph) {
            Ok(applied) => applied,
            Err(error) => {
                tracing::info!(
                    event = "permissions.mutate",
                    outcome = "rejected",
                    operation,
                    guild_id = %guild_id,
                    %error
                );
                return Err(error.into());
            }
        };
        if !changed {
            tracing::debug!(
                event = "permissions.mutate",
                outcome = "unchanged",
                operation,
                guild_id = %guild_id
            );
            return Ok(output);
        }

        let mut next = (*current).clone();
        if graph.is_empty() {
            next.remove(&guild_id);
        } else {
            next.insert(guild_id, Arc::new(graph));
        }
        self.publish(guild_id, operation, next).await?;
        Ok(output)
    }

    /// Persists `next`, then makes it visible and invalidates the guild.
    /// Must be called with the writer lock held.
    async fn publish(
        &self,
        guild_id: GuildId,
        operation: &'static str,
        next: PermissionGraphs,
    ) -> Result<(), PermissionError> {
        self.storage.save(&next).await?;
        *self.graphs.write().await = Arc::new(next);
        self.cache.invalidate_guild(guild_id).await;
        tracing::info!(
            event = "permissions.mutate",
            outcome = "applied",
            operation,
            guild_id = %guild_id
        );
        Ok(())
    }
}

fn changed(changed: bool) -> (bool, bool) {
    (changed, changed)
}
