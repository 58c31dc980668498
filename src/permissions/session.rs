//! Per-session permission context.
//!
//! A session is opened on the first dealership-scoped request of an authenticated user and
//! closed on logout. While open it hands out the same [`PermissionGuard`], so memoized answers
//! stay stable. The guard is replaced when its set is refreshed, older than the cache TTL, or
//! loaded under a generation the service has since invalidated. Sessions nobody touched for
//! the idle timeout are evicted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::guard::PermissionGuard;
use super::refresh::{RefreshError, SessionKey};
use super::service::{Generation, PermissionService};
use super::types::ResolvedPermissionSet;
use crate::config::PermissionsConfig;

/// A set whose generation keeps moving is handed out anyway after this many loads; the
/// session then re-resolves on its next access.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// How long a session may serve a set before re-resolving it.
    pub max_age: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(86_400),
            idle_timeout: Duration::from_secs(1_800),
        }
    }
}

impl From<&PermissionsConfig> for SessionPolicy {
    fn from(config: &PermissionsConfig) -> Self {
        Self {
            max_age: config.cache_ttl(),
            idle_timeout: config.session_idle_timeout(),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    guard: Arc<PermissionGuard>,
    generation: Generation,
    resolved_at: Instant,
}

impl SessionState {
    fn new(set: Arc<ResolvedPermissionSet>, generation: Generation) -> Self {
        Self {
            guard: Arc::new(PermissionGuard::new(set)),
            generation,
            resolved_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub struct PermissionSession {
    user_id: Uuid,
    dealership_id: Uuid,
    opened_at: DateTime<Utc>,
    last_seen_ms: AtomicI64,
    state: RwLock<SessionState>,
}

impl PermissionSession {
    fn new(set: Arc<ResolvedPermissionSet>, generation: Generation) -> Self {
        let opened_at = Utc::now();
        Self {
            user_id: set.user_id,
            dealership_id: set.dealership_id,
            opened_at,
            last_seen_ms: AtomicI64::new(opened_at.timestamp_millis()),
            state: RwLock::new(SessionState::new(set, generation)),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn dealership_id(&self) -> Uuid {
        self.dealership_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub async fn guard(&self) -> Arc<PermissionGuard> {
        Arc::clone(&self.state.read().await.guard)
    }

    fn touch(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self, now_ms: i64) -> Duration {
        let idle = now_ms.saturating_sub(self.last_seen_ms.load(Ordering::Relaxed));
        Duration::from_millis(idle.max(0) as u64)
    }

    async fn is_current(&self, generation: Generation, max_age: Duration) -> bool {
        let state = self.state.read().await;
        !state.guard.set().is_retryable()
            && state.generation == generation
            && state.resolved_at.elapsed() < max_age
    }

    async fn replace(
        &self,
        set: Arc<ResolvedPermissionSet>,
        generation: Generation,
    ) -> Arc<PermissionGuard> {
        let state = SessionState::new(set, generation);
        let guard = Arc::clone(&state.guard);
        *self.state.write().await = state;
        guard
    }
}

pub struct SessionRegistry {
    service: Arc<PermissionService>,
    policy: SessionPolicy,
    sessions: DashMap<SessionKey, Arc<PermissionSession>>,
}

impl SessionRegistry {
    pub fn new(service: Arc<PermissionService>, policy: SessionPolicy) -> Self {
        Self {
            service,
            policy,
            sessions: DashMap::new(),
        }
    }

    pub fn service(&self) -> &Arc<PermissionService> {
        &self.service
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Returns the open session, opening one when needed. An open session re-resolves when
    /// its set is unavailable, expired, or from an invalidated generation.
    pub async fn open(&self, user_id: Uuid, dealership_id: Uuid) -> Arc<PermissionSession> {
        let key = (user_id, dealership_id);

        let existing = self.sessions.get(&key).map(|s| Arc::clone(s.value()));
        if let Some(session) = existing {
            session.touch();
            let generation = self.service.generation(user_id, dealership_id);
            if !session.is_current(generation, self.policy.max_age).await {
                let (set, generation) = self.resolve_stable(user_id, dealership_id).await;
                session.replace(set, generation).await;
                debug!(user_id = %user_id, dealership_id = %dealership_id, "Permission session re-resolved");
            }
            return session;
        }

        let (set, generation) = self.resolve_stable(user_id, dealership_id).await;
        let session = Arc::clone(
            self.sessions
                .entry(key)
                .or_insert_with(|| Arc::new(PermissionSession::new(set, generation)))
                .value(),
        );
        debug!(user_id = %user_id, dealership_id = %dealership_id, "Permission session opened");
        session
    }

    /// Resolves until no invalidation lands during the load. The returned generation is the
    /// one read before the load, so a set that raced an invalidation is stamped as stale.
    async fn resolve_stable(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> (Arc<ResolvedPermissionSet>, Generation) {
        let mut generation = self.service.generation(user_id, dealership_id);
        let mut attempts = 0;
        loop {
            let set = self.service.resolve(user_id, dealership_id).await;
            attempts += 1;
            let current = self.service.generation(user_id, dealership_id);
            if current == generation || attempts == MAX_RESOLVE_ATTEMPTS {
                return (set, generation);
            }
            generation = current;
        }
    }

    pub async fn guard(&self, user_id: Uuid, dealership_id: Uuid) -> Arc<PermissionGuard> {
        self.open(user_id, dealership_id).await.guard().await
    }

    /// Forced refresh of an open session. Rate limited per `(user, dealership)`.
    pub async fn refresh(
        &self,
        user_id: Uuid,
        dealership_id: Uuid,
    ) -> Result<Arc<PermissionGuard>, RefreshError> {
        let (set, generation) = self
            .service
            .force_refresh_at(user_id, dealership_id)
            .await?;

        let session = Arc::clone(
            self.sessions
                .entry((user_id, dealership_id))
                .or_insert_with(|| Arc::new(PermissionSession::new(Arc::clone(&set), generation)))
                .value(),
        );
        session.touch();
        Ok(session.replace(set, generation).await)
    }

    /// Tears down the session and its cache entry. Returns whether a session was open.
    pub async fn close(&self, user_id: Uuid, dealership_id: Uuid) -> bool {
        let removed = self.sessions.remove(&(user_id, dealership_id)).is_some();
        self.service.invalidate(user_id, dealership_id).await;
        if removed {
            info!(user_id = %user_id, dealership_id = %dealership_id, "Permission session closed");
        }
        removed
    }

    /// Closes every session the user has open, in any dealership.
    pub async fn close_user(&self, user_id: Uuid) -> usize {
        let mut closed = 0;
        for dealership_id in self.dealerships_of(user_id) {
            if self.close(user_id, dealership_id).await {
                closed += 1;
            }
        }
        closed
    }

    fn dealerships_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| entry.key().1)
            .collect()
    }

    /// Drops everything derived from one user's rows in one dealership, e.g. after a role
    /// assignment or bypass change.
    pub async fn reload_user(&self, user_id: Uuid, dealership_id: Uuid) {
        self.sessions.remove(&(user_id, dealership_id));
        self.service.invalidate(user_id, dealership_id).await;
    }

    /// Same as [`Self::reload_user`] for every user of the dealership.
    pub async fn reload_dealership(&self, dealership_id: Uuid) {
        self.sessions.retain(|(_, dealer), _| *dealer != dealership_id);
        self.service.invalidate_dealership(dealership_id).await;
    }

    /// A bypass flag is stored on the user and applies in every dealership.
    pub async fn reload_user_everywhere(&self, user_id: Uuid) {
        for dealership_id in self.dealerships_of(user_id) {
            self.reload_user(user_id, dealership_id).await;
        }
    }

    /// Removes sessions not used within the idle timeout. Their cache entries are left to
    /// expire on their own.
    pub fn evict_idle(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.idle_for(now_ms) < self.policy.idle_timeout);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, "Evicted idle permission sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Runs [`SessionRegistry::evict_idle`] periodically until the task is aborted.
pub fn spawn_idle_sweeper(registry: Arc<SessionRegistry>) -> JoinHandle<()> {
    let period = (registry.policy().idle_timeout / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            registry.evict_idle();
        }
    })
}
