//! Resolution pipeline: cache, coalesced store fetch, resolver.
//!
//! Every `(user, dealership)` pair carries a generation that invalidation bumps. A load
//! started under an older generation is neither joined by later callers nor allowed to
//! leave its result in the cache.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::coalesce::InflightRequests;
use super::refresh::{RefreshError, RefreshLimiter, SessionKey};
use super::resolver::resolve;
use super::types::{AccessSource, ResolvedPermissionSet};
use crate::cache::permission_cache::{CacheError, PermissionCache};
use crate::store::{PermissionStore, StoreError};
use crate::telemetry::{record_refresh, record_resolution};

/// `(session generation, dealership generation)`.
pub type Generation = (u64, u64);

#[derive(Debug, Default)]
struct Generations {
    sessions: DashMap<SessionKey, u64>,
    dealerships: DashMap<Uuid, u64>,
}

impl Generations {
    fn current(&self, key: SessionKey) -> Generation {
        let session = self.sessions.get(&key).map(|g| *g).unwrap_or(0);
        let dealership = self.dealerships.get(&key.1).map(|g| *g).unwrap_or(0);
        (session, dealership)
    }

    fn bump_session(&self, key: SessionKey) {
        *self.sessions.entry(key).or_insert(0) += 1;
    }

    fn bump_dealership(&self, dealership_id: Uuid) {
        *self.dealerships.entry(dealership_id).or_insert(0) += 1;
    }
}

pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
    cache: PermissionCache,
    inflight: InflightRequests<(SessionKey, Generation), Arc<ResolvedPermissionSet>>,
    generations: Arc<Generations>,
    refresh: RefreshLimiter,
}

impl PermissionService {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        cache: PermissionCache,
        refresh: RefreshLimiter,
    ) -> Self {
        Self {
            store,
            cache,
            inflight: InflightRequests::new(),
            generations: Arc::new(Generations::default()),
            refresh,
        }
    }

    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    pub async fn ping_store(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    /// Changes whenever the pair, or its dealership, is invalidated or force-refreshed.
    pub fn generation(&self, user_id: Uuid, dealership_id: Uuid) -> Generation {
        self.generations.current((user_id, dealership_id))
    }

    /// Effective permissions of `user_id` in `dealership_id`.
    ///
    /// Never fails: a store error yields an [`AccessSource::Unavailable`] set that denies
    /// everything and is not cached.
    #[instrument(skip(self))]
    pub async fn resolve(&self, user_id: Uuid, dealership_id: Uuid) -> Arc<ResolvedPermissionSet> {
        let start = Instant::now();
        if let Some(set) = self.cache.get(user_id, dealership_id).await {
            record_resolution(&set.source, true, start.elapsed());
            return Arc::new(set);
        }

        self.load(user_id, dealership_id).await
    }

    /// Skips the cache and resolves from the store, subject to the refresh limiter.
    #[instrument(skip(self))]
    pub async fn force_refresh(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<Arc<ResolvedPermissionSet>, RefreshError> {
        self.force_refresh_at(user_id, dealership_id)
            .await
            .map(|(set, _)| set)
    }

    /// [`Self::force_refresh`] plus the generation the set was loaded under.
    pub async fn force_refresh_at(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<(Arc<ResolvedPermissionSet>, Generation), RefreshError> {
        if let Err(e) = self.refresh.check(user_id, dealership_id) {
            record_refresh(false);
            return Err(e);
        }
        record_refresh(true);

        self.invalidate(user_id, dealership_id).await;
        let generation = self.generation(user_id, dealership_id);
        let set = self.load_at(user_id, dealership_id, generation).await;
        Ok((set, generation))
    }

    pub async fn invalidate(&self, user_id: Uuid, dealership_id: Uuid) {
        self.generations.bump_session((user_id, dealership_id));
        self.drop_cached(self.cache.invalidate(user_id, dealership_id).await);
    }

    pub async fn invalidate_dealership(&self, dealership_id: Uuid) {
        self.generations.bump_dealership(dealership_id);
        self.drop_cached(self.cache.invalidate_dealership(dealership_id).await);
    }

    fn drop_cached(&self, result: Result<(), CacheError>) {
        match result {
            Ok(()) | Err(CacheError::Disabled) => {}
            Err(e) => warn!(error = %e, "Permission cache invalidation failed"),
        }
    }

    async fn load(&self, user_id: Uuid, dealership_id: Uuid) -> Arc<ResolvedPermissionSet> {
        let generation = self.generation(user_id, dealership_id);
        self.load_at(user_id, dealership_id, generation).await
    }

    async fn load_at(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
        generation: Generation,
    ) -> Arc<ResolvedPermissionSet> {
        let key = (user_id, dealership_id);
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        let generations = Arc::clone(&self.generations);

        self.inflight
            .run((key, generation), move || async move {
                let start = Instant::now();
                let set = match store.fetch_rows(user_id, dealership_id).await {
                    Ok(rows) => {
                        let set = resolve(&rows);
                        store_if_current(&cache, &generations, generation, &set).await;
                        set
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            user_id = %user_id,
                            dealership_id = %dealership_id,
                            "Permission rows unavailable, denying all access"
                        );
                        ResolvedPermissionSet::denied(
                            user_id,
                            dealership_id,
                            AccessSource::Unavailable,
                        )
                    }
                };

                record_resolution(&set.source, false, start.elapsed());
                Arc::new(set)
            })
            .await
    }
}

/// Writes the set unless an invalidation ran since the load began. The generation is read
/// again after the write, so an invalidation racing the write still removes the entry.
async fn store_if_current(
    cache: &PermissionCache,
    generations: &Generations,
    generation: Generation,
    set: &ResolvedPermissionSet,
) {
    let key = (set.user_id, set.dealership_id);
    if generations.current(key) != generation {
        debug!(user_id = %set.user_id, dealership_id = %set.dealership_id, "Invalidated while loading, not caching");
        return;
    }

    match cache.set(set).await {
        Ok(()) => {}
        Err(CacheError::Disabled) => return,
        Err(e) => {
            debug!(error = %e, "Resolved permissions not cached");
            return;
        }
    }

    if generations.current(key) != generation {
        if let Err(e) = cache.invalidate(set.user_id, set.dealership_id).await {
            warn!(error = %e, "Failed to drop permissions cached during invalidation");
        }
    }
}
