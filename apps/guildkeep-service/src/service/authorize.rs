use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use guildkeep_core::{resolve, GuildId, HeldNodes, PermissionNode, RoleId, UserId};

use super::{
    cache::{CacheKey, PermissionCache, RoleFingerprint},
    metrics::record_resolution_failure,
    permissions::PermissionRepository,
};

/// Answers "may this member do X" from cached or freshly resolved held nodes.
pub struct Authorizer {
    permissions: Arc<PermissionRepository>,
    cache: Arc<PermissionCache>,
    resolutions: AtomicU64,
}

impl Authorizer {
    #[must_use]
    pub fn new(permissions: Arc<PermissionRepository>) -> Self {
        let cache = Arc::clone(permissions.cache());
        Self {
            permissions,
            cache,
            resolutions: AtomicU64::new(0),
        }
    }

    /// Whether the member holds `required`. Never fails: anything that
    /// prevents resolution denies.
    pub async fn has_permission(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
        required: &PermissionNode,
    ) -> bool {
        let allowed = self
            .held_nodes(guild_id, user_id, roles)
            .await
            .satisfies(required);
        tracing::debug!(
            event = "authorize.check",
            guild_id = %guild_id,
            user_id = %user_id,
            node = %required,
            allowed
        );
        allowed
    }

    /// Every node the member holds, as granted (wildcards unexpanded).
    pub async fn held_nodes(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        roles: &[RoleId],
    ) -> Arc<HeldNodes> {
        let roles: BTreeSet<RoleId> = roles.iter().copied().collect();
        let key = CacheKey {
            guild_id,
            user_id,
            fingerprint: RoleFingerprint::of(&roles),
        };
        if let Some(held) = self.cache.get(&key).await {
            return held;
        }

        let generation = self.cache.generation(guild_id).await;
        let graph = self.permissions.snapshot(guild_id).await;
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        match resolve(&graph, &roles) {
            Ok(held) => {
                let held = Arc::new(held);
                self.cache.insert(key, Arc::clone(&held), generation).await;
                held
            }
            Err(error) => {
                record_resolution_failure();
                tracing::error!(
                    event = "authorize.resolve",
                    outcome = "failed",
                    guild_id = %guild_id,
                    user_id = %user_id,
                    %error
                );
                Arc::new(HeldNodes::default())
            }
        }
    }

    /// Number of resolutions performed because the cache had no fresh entry.
    #[must_use]
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }
}
