use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use stepwise_types::WorkflowDefinition;
use tracing::debug;

use super::{StoreError, WorkflowStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Snapshot {
    definitions: Vec<Arc<WorkflowDefinition>>,
    loaded_at: Instant,
}

/// TTL cache over another store. The whole listing is cached; `get` and
/// `summaries` are answered from it. The lock is never held while the inner
/// store loads.
pub struct CachingStore<S> {
    inner: S,
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
    refreshing: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: WorkflowStore> CachingStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            snapshot: Mutex::new(None),
            refreshing: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drops the cached listing so the next call reloads.
    pub fn invalidate(&self) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<S: WorkflowStore> WorkflowStore for CachingStore<S> {
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError> {
        let stale = {
            let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            match snapshot.as_ref() {
                Some(cached) if cached.loaded_at.elapsed() < self.ttl => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(cached.definitions.clone());
                }
                Some(cached) => Some(cached.definitions.clone()),
                None => None,
            }
        };

        // One caller reloads; the others keep serving the expired listing meanwhile.
        let claimed = !self.refreshing.swap(true, Ordering::AcqRel);
        if !claimed && let Some(stale) = stale {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(stale);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.inner.list();
        if let Ok(definitions) = &loaded {
            debug!(count = definitions.len(), "workflow cache refreshed");
            *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Snapshot {
                definitions: definitions.clone(),
                loaded_at: Instant::now(),
            });
        }
        if claimed {
            self.refreshing.store(false, Ordering::Release);
        }
        loaded
    }
}
