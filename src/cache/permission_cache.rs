//! Versioned cache of resolved permission sets.
//!
//! Entries are snapshots encoded by [`crate::permissions::snapshot`]. The key embeds
//! [`CACHE_VERSION`] and so does the payload; anything that fails to decode, carries another
//! version, belongs to another key, or has outlived the TTL is deleted and reported as a miss.

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::permissions::snapshot::{self, SnapshotError, CACHE_VERSION};
use crate::permissions::types::ResolvedPermissionSet;
use crate::telemetry::{record_cache_lookup, CacheOutcome};

const PERMISSION_CACHE_PREFIX: &str = "permissions:";
pub const DEFAULT_TTL_SECS: u64 = 86_400;
const SCAN_BATCH: usize = 200;

#[derive(Clone)]
enum CacheBackend {
    Redis(Pool),
    Memory(Arc<DashMap<String, String>>),
    Disabled,
}

#[derive(Clone)]
pub struct PermissionCache {
    backend: CacheBackend,
    ttl: Duration,
}

impl PermissionCache {
    pub fn redis(pool: Pool, ttl: Duration) -> Self {
        Self {
            backend: CacheBackend::Redis(pool),
            ttl,
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            backend: CacheBackend::Memory(Arc::new(DashMap::new())),
            ttl,
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: CacheBackend::Disabled,
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
        }
    }

    /// Redis when a pool is available, otherwise an in-process map.
    pub fn new(pool: Option<Pool>, ttl: Duration) -> Self {
        match pool {
            Some(pool) => Self::redis(pool, ttl),
            None => Self::in_memory(ttl),
        }
    }

    fn cache_key(user_id: Uuid, dealership_id: Uuid) -> String {
        format!(
            "{}v{}:{}:{}",
            PERMISSION_CACHE_PREFIX, CACHE_VERSION, user_id, dealership_id
        )
    }

    fn dealership_pattern(dealership_id: Uuid) -> String {
        format!(
            "{}v{}:*:{}",
            PERMISSION_CACHE_PREFIX, CACHE_VERSION, dealership_id
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, CacheBackend::Disabled)
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            CacheBackend::Redis(_) => "redis",
            CacheBackend::Memory(_) => "memory",
            CacheBackend::Disabled => "disabled",
        }
    }

    /// Round trip to the backend. Only Redis can fail.
    pub async fn ping(&self) -> Result<(), CacheError> {
        match &self.backend {
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await.map_err(|e| {
                    debug!(error = %e, "Redis ping could not connect");
                    CacheError::ConnectionFailed
                })?;
                let _: String = redis::cmd("PING")
                    .query_async(&mut *conn)
                    .await
                    .map_err(|e| {
                        debug!(error = %e, "Redis ping failed");
                        CacheError::OperationFailed
                    })?;
                Ok(())
            }
            CacheBackend::Memory(_) => Ok(()),
            CacheBackend::Disabled => Err(CacheError::Disabled),
        }
    }

    pub fn redis_pool(&self) -> Option<&Pool> {
        match &self.backend {
            CacheBackend::Redis(pool) => Some(pool),
            _ => None,
        }
    }

    pub async fn set(&self, set: &ResolvedPermissionSet) -> Result<(), CacheError> {
        if !self.is_available() {
            return Err(CacheError::Disabled);
        }

        let raw = snapshot::encode(set, now_millis()).map_err(CacheError::Serialization)?;
        let key = Self::cache_key(set.user_id, set.dealership_id);
        self.write_raw(&key, raw).await?;

        debug!(user_id = %set.user_id, dealership_id = %set.dealership_id, "Permissions cached");
        Ok(())
    }

    pub async fn get(&self, user_id: Uuid, dealership_id: Uuid) -> Option<ResolvedPermissionSet> {
        let key = Self::cache_key(user_id, dealership_id);
        let Some(raw) = self.read_raw(&key).await else {
            record_cache_lookup(CacheOutcome::Miss);
            return None;
        };

        let snapshot = match snapshot::decode(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let outcome = match e {
                    SnapshotError::StaleVersion { .. } => CacheOutcome::Stale,
                    _ => CacheOutcome::Corrupt,
                };
                warn!(error = %e, user_id = %user_id, dealership_id = %dealership_id, "Discarding unusable permission cache entry");
                self.discard(&key, outcome).await;
                return None;
            }
        };

        if snapshot.user_id != user_id || snapshot.dealership_id != dealership_id {
            warn!(user_id = %user_id, dealership_id = %dealership_id, "Permission cache entry belongs to another session");
            self.discard(&key, CacheOutcome::Corrupt).await;
            return None;
        }

        let age_ms = now_millis().saturating_sub(snapshot.cached_at);
        if age_ms < 0 || age_ms as u128 >= self.ttl.as_millis() {
            debug!(user_id = %user_id, dealership_id = %dealership_id, age_ms, "Permission cache entry expired");
            self.discard(&key, CacheOutcome::Expired).await;
            return None;
        }

        record_cache_lookup(CacheOutcome::Hit);
        Some(snapshot.into_set())
    }

    pub async fn invalidate(&self, user_id: Uuid, dealership_id: Uuid) -> Result<(), CacheError> {
        let key = Self::cache_key(user_id, dealership_id);
        self.delete_keys(vec![key]).await?;
        debug!(user_id = %user_id, dealership_id = %dealership_id, "Permission cache invalidated");
        Ok(())
    }

    /// Drops every cached set of the dealership, e.g. after a module toggle or role edit.
    pub async fn invalidate_dealership(&self, dealership_id: Uuid) -> Result<(), CacheError> {
        match &self.backend {
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await.map_err(|e| {
                    error!(error = %e, "Failed to get Redis connection");
                    CacheError::ConnectionFailed
                })?;

                let pattern = Self::dealership_pattern(dealership_id);
                let mut cursor: u64 = 0;
                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut *conn)
                        .await
                        .map_err(|e| {
                            error!(error = %e, "Failed to scan dealership permission cache");
                            CacheError::OperationFailed
                        })?;

                    if !keys.is_empty() {
                        conn.del::<_, ()>(keys).await.map_err(|e| {
                            error!(error = %e, "Failed to invalidate dealership permission cache");
                            CacheError::OperationFailed
                        })?;
                    }

                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
            }
            CacheBackend::Memory(map) => {
                let suffix = format!(":{}", dealership_id);
                map.retain(|key, _| !key.ends_with(&suffix));
            }
            CacheBackend::Disabled => return Err(CacheError::Disabled),
        }

        debug!(dealership_id = %dealership_id, "Dealership permission cache invalidated");
        Ok(())
    }

    async fn discard(&self, key: &str, outcome: CacheOutcome) {
        record_cache_lookup(outcome);
        if let Err(e) = self.delete_keys(vec![key.to_string()]).await {
            debug!(error = %e, "Failed to delete discarded permission cache entry");
        }
    }

    async fn read_raw(&self, key: &str) -> Option<String> {
        match &self.backend {
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await.ok()?;
                conn.get::<_, Option<String>>(key).await.ok()?
            }
            CacheBackend::Memory(map) => map.get(key).map(|v| v.clone()),
            CacheBackend::Disabled => None,
        }
    }

    async fn write_raw(&self, key: &str, raw: String) -> Result<(), CacheError> {
        match &self.backend {
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await.map_err(|e| {
                    error!(error = %e, "Failed to get Redis connection");
                    CacheError::ConnectionFailed
                })?;

                conn.set_ex::<_, _, ()>(key, raw, self.ttl.as_secs().max(1))
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Failed to cache permissions");
                        CacheError::OperationFailed
                    })
            }
            CacheBackend::Memory(map) => {
                map.insert(key.to_string(), raw);
                Ok(())
            }
            CacheBackend::Disabled => Err(CacheError::Disabled),
        }
    }

    async fn delete_keys(&self, keys: Vec<String>) -> Result<(), CacheError> {
        match &self.backend {
            CacheBackend::Redis(pool) => {
                let mut conn = pool.get().await.map_err(|e| {
                    error!(error = %e, "Failed to get Redis connection");
                    CacheError::ConnectionFailed
                })?;

                conn.del::<_, ()>(keys).await.map_err(|e| {
                    error!(error = %e, "Failed to invalidate permission cache");
                    CacheError::OperationFailed
                })
            }
            CacheBackend::Memory(map) => {
                for key in keys {
                    map.remove(&key);
                }
                Ok(())
            }
            CacheBackend::Disabled => Err(CacheError::Disabled),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Permission cache disabled")]
    Disabled,
    #[error("Redis connection failed")]
    ConnectionFailed,
    #[error("Redis operation failed")]
    OperationFailed,
    #[error("Serialization failed: {0}")]
    Serialization(#[source] SnapshotError),
}
