use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use guildkeep_core::{GuildId, HeldNodes, RoleId, UserId};
use sha2::{Digest, Sha256};
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};

use super::metrics::{
    record_cache_invalidation, record_cache_lookup, CACHE_LOOKUP_EXPIRED, CACHE_LOOKUP_HIT,
    CACHE_LOOKUP_MISS,
};

/// Order-independent digest of a member's role ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleFingerprint([u8; 32]);

impl RoleFingerprint {
    #[must_use]
    pub fn of(roles: &BTreeSet<RoleId>) -> Self {
        let mut hasher = Sha256::new();
        for role in roles {
            hasher.update(role.get().to_be_bytes());
        }
        Self(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub fingerprint: RoleFingerprint,
}

#[derive(Debug, Clone)]
pub struct CachedPermissionSet {
    pub held: Arc<HeldNodes>,
    pub computed_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub stored: u64,
    pub discarded: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CachedPermissionSet>,
    generations: HashMap<GuildId, u64>,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    stored: AtomicU64,
    discarded: AtomicU64,
    invalidations: AtomicU64,
}

/// TTL memoization of resolved held-node sets.
///
/// Expiry is checked lazily on read. Every guild carries a generation that
/// [`PermissionCache::invalidate_guild`] bumps; a resolution started under an
/// older generation is dropped instead of stored, so an entry computed from a
/// pre-mutation snapshot never outlives the mutation.
pub struct PermissionCache {
    ttl: Duration,
    state: RwLock<CacheState>,
    counters: CacheCounters,
}

impl PermissionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
            counters: CacheCounters::default(),
        }
    }

    /// Returns the held set for `key` if it was computed less than one TTL ago.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<HeldNodes>> {
        let state = self.state.read().await;
        match state.entries.get(key) {
            Some(entry) if entry.computed_at.elapsed() < self.ttl => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(CACHE_LOOKUP_HIT);
                Some(Arc::clone(&entry.held))
            }
            Some(_) => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(CACHE_LOOKUP_EXPIRED);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                record_cache_lookup(CACHE_LOOKUP_MISS);
                None
            }
        }
    }

    /// Current generation of `guild_id`; pass it back to [`PermissionCache::insert`].
    pub async fn generation(&self, guild_id: GuildId) -> u64 {
        self.state
            .read()
            .await
            .generations
            .get(&guild_id)
            .copied()
            .unwrap_or(0)
    }

    /// Stores `held` under `key`, replacing any stale entry, unless the guild
    /// was invalidated after `generation` was read. Returns whether it was stored.
    pub async fn insert(&self, key: CacheKey, held: Arc<HeldNodes>, generation: u64) -> bool {
        let mut state = self.state.write().await;
        let current = state
            .generations
            .get(&key.guild_id)
            .copied()
            .unwrap_or(0);
        if current != generation {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event = "permission_cache.insert",
                outcome = "discarded_stale_generation",
                guild_id = %key.guild_id
            );
            return false;
        }
        state.entries.insert(
            key,
            CachedPermissionSet {
                held,
                computed_at: Instant::now(),
            },
        );
        self.counters.stored.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drops every entry of `guild_id`. Returns the number of entries removed.
    pub async fn invalidate_guild(&self, guild_id: GuildId) -> usize {
        let mut state = self.state.write().await;
        *state.generations.entry(guild_id).or_insert(0) += 1;
        let before = state.entries.len();
        state.entries.retain(|key, _| key.guild_id != guild_id);
        let removed = before - state.entries.len();
        drop(state);

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        record_cache_invalidation();
        tracing::debug!(
            event = "permission_cache.invalidate",
            outcome = "guild",
            guild_id = %guild_id,
            removed
        );
        removed
    }

    /// Removes entries older than the TTL. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        let ttl = self.ttl;
        state
            .entries
            .retain(|_, entry| entry.computed_at.elapsed() < ttl);
        before - state.entries.len()
    }

    /// Periodically reclaims expired entries until the returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired().await;
                if removed > 0 {
                    tracing::debug!(event = "permission_cache.sweep", removed);
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}
