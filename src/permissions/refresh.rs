//! Rate limiting of forced permission refreshes.
//!
//! A forced refresh bypasses the cache, so each `(user, dealership)` pair gets both a minimum
//! spacing between refreshes and a per-minute budget.

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tracing::warn;
use uuid::Uuid;

use crate::config::PermissionsConfig;

pub type SessionKey = (Uuid, Uuid);

type KeyedLimiter =
    RateLimiter<SessionKey, DashMapStateStore<SessionKey>, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub min_interval: Duration,
    pub max_per_minute: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_per_minute: 10,
        }
    }
}

impl From<&PermissionsConfig> for RefreshPolicy {
    fn from(config: &PermissionsConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.refresh_min_interval_ms),
            max_per_minute: config.refresh_max_per_minute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("permission refresh rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl RefreshError {
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            RefreshError::RateLimited { retry_after } => retry_after.as_secs().max(1),
        }
    }
}

#[derive(Clone)]
pub struct RefreshLimiter {
    interval: Option<Arc<KeyedLimiter>>,
    budget: Option<Arc<KeyedLimiter>>,
}

impl RefreshLimiter {
    pub fn new(policy: &RefreshPolicy) -> Self {
        let interval = Quota::with_period(policy.min_interval)
            .map(|quota| Arc::new(RateLimiter::dashmap(quota.allow_burst(NonZeroU32::MIN))));

        let budget = NonZeroU32::new(policy.max_per_minute)
            .map(|max| Arc::new(RateLimiter::dashmap(Quota::per_minute(max))));

        Self { interval, budget }
    }

    pub fn unlimited() -> Self {
        Self {
            interval: None,
            budget: None,
        }
    }

    pub fn check(&self, user_id: Uuid, dealership_id: Uuid) -> Result<(), RefreshError> {
        let key = (user_id, dealership_id);

        for limiter in [&self.interval, &self.budget].into_iter().flatten() {
            if let Err(not_until) = limiter.check_key(&key) {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                warn!(
                    user_id = %user_id,
                    dealership_id = %dealership_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Permission refresh rate limited"
                );
                return Err(RefreshError::RateLimited { retry_after });
            }
        }

        Ok(())
    }
}
