//! De-duplication of concurrent resolutions.
//!
//! The first caller for a key starts the work; every caller arriving while it runs awaits the
//! same shared future. The entry is removed by the work itself once it finishes, so a later
//! caller starts fresh.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

type SharedWork<V> = Shared<BoxFuture<'static, V>>;

pub struct InflightRequests<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inflight: Arc<DashMap<K, SharedWork<V>>>,
}

impl<K, V> InflightRequests<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Runs `make()` unless work for `key` is already in flight, in which case its result is
    /// awaited instead. `make` is only called by the caller that starts the work.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let work = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(key = ?key, "Joining in-flight resolution");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let inflight = Arc::clone(&self.inflight);
                let cleanup_key = key.clone();
                let fut = make();
                let work = async move {
                    let value = fut.await;
                    inflight.remove(&cleanup_key);
                    value
                }
                .boxed()
                .shared();
                entry.insert(work.clone());
                work
            }
        };

        work.await
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

impl<K, V> Default for InflightRequests<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
