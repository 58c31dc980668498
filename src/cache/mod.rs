//! Permission cache storage and the Redis pool behind it.

pub mod permission_cache;

use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use tracing::info;

use crate::config::{PermissionsConfig, RedisConfig};

pub use permission_cache::{CacheError, PermissionCache};

pub fn create_redis_pool(config: &RedisConfig) -> Option<Pool> {
    let url = config.url.as_ref()?;

    let timeout = std::time::Duration::from_secs(config.connection_timeout_secs);
    let pool = RedisPoolConfig::from_url(url).builder().ok().and_then(|b| {
        b.max_size(config.pool_size)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .ok()
    });

    if pool.is_some() {
        info!(redis_url = %url.split('@').next_back().unwrap_or("***"), "Redis pool created");
    }

    pool
}

/// Picks the cache backend from configuration: disabled, Redis, or process memory.
pub fn build_permission_cache(config: &PermissionsConfig, redis_pool: Option<Pool>) -> PermissionCache {
    if !config.cache_enabled {
        info!("Permission cache disabled");
        return PermissionCache::disabled();
    }

    if redis_pool.is_none() {
        info!("No Redis configured, caching permissions in process memory");
    }

    PermissionCache::new(redis_pool, config.cache_ttl())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_url_means_no_pool() {
        let config = RedisConfig {
            url: None,
            pool_size: 5,
            connection_timeout_secs: 5,
        };
        assert!(create_redis_pool(&config).is_none());
    }

    #[test]
    fn test_cache_backend_selection() {
        let mut config = PermissionsConfig::default();
        assert!(build_permission_cache(&config, None).is_available());

        config.cache_enabled = false;
        assert!(!build_permission_cache(&config, None).is_available());
    }
}
