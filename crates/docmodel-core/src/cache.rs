//! Object caches keyed by identity.
//!
//! Fetched objects can be cached two ways:
//!
//! - [`StrongCache`] holds shared handles until they are invalidated (or
//!   evicted, when bounded). Used for model types with `cache_by_id` set.
//! - [`WeakCachePool`] holds weak handles, so an object stays shared only while
//!   something else keeps it alive. It is opt-in and never needed for
//!   correctness.
//!
//! Both key entries by model name and the string from
//! [`Structure::id_cache_key`](crate::Structure::id_cache_key). Because entries
//! are shared handles, two lookups of the same key return the same object and
//! a change made through one is visible through the other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::model::{ModelRef, WeakModelRef};

type CacheKey = (String, String);

fn cache_key(model: &str, key: &str) -> CacheKey {
    (model.to_string(), key.to_string())
}

/// A cache of shared model handles.
pub trait ObjectCache: Send + Sync {
    fn get(&self, model: &str, key: &str) -> Option<ModelRef>;

    fn set(&self, model: &str, key: &str, object: &ModelRef);

    /// Returns `true` if an entry was removed.
    fn remove(&self, model: &str, key: &str) -> bool;

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct StrongEntries {
    entries: HashMap<CacheKey, ModelRef>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
}

/// Keeps objects alive until invalidated.
///
/// With a capacity, the oldest entries are evicted first.
#[derive(Default)]
pub struct StrongCache {
    inner: Mutex<StrongEntries>,
    capacity: Option<usize>,
}

impl StrongCache {
    /// Create an unbounded cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that holds at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StrongEntries::default()),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Remove every entry for one model type.
    pub fn invalidate_model(&self, model: &str) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.entries.len();
        inner.entries.retain(|(m, _), _| m != model);
        inner.order.retain(|(m, _)| m != model);
        before - inner.entries.len()
    }
}

impl ObjectCache for StrongCache {
    fn get(&self, model: &str, key: &str) -> Option<ModelRef> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&cache_key(model, key)).cloned()
    }

    fn set(&self, model: &str, key: &str, object: &ModelRef) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let k = cache_key(model, key);
        if inner.entries.insert(k.clone(), object.clone()).is_none() {
            inner.order.push_back(k);
        }
        if let Some(capacity) = self.capacity {
            while inner.entries.len() > capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
                tracing::debug!(model = %oldest.0, key = %oldest.1, "evicted from strong cache");
            }
        }
    }

    fn remove(&self, model: &str, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let k = cache_key(model, key);
        let removed = inner.entries.remove(&k).is_some();
        if removed {
            inner.order.retain(|existing| existing != &k);
        }
        removed
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.order.clear();
    }

    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }
}

impl std::fmt::Debug for StrongCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrongCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Shares objects while they are alive elsewhere. Disabled by default.
///
/// Turning the pool on or off clears it. While disabled, `set` is a no-op and
/// `get` always misses.
#[derive(Default)]
pub struct WeakCachePool {
    enabled: AtomicBool,
    entries: Mutex<HashMap<CacheKey, WeakModelRef>>,
}

impl WeakCachePool {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the pool. A change of state clears it.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            self.clear();
            tracing::debug!(enabled = enabled, "weak cache pool toggled");
        }
    }

    /// Enable the pool until the returned guard is dropped.
    pub fn scoped_enable(&self) -> WeakCacheScope<'_> {
        let previous = self.is_enabled();
        self.set_enabled(true);
        WeakCacheScope {
            pool: self,
            previous,
        }
    }

    /// Drop entries whose objects are gone.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, weak| weak.is_alive());
        before - entries.len()
    }
}

impl ObjectCache for WeakCachePool {
    fn get(&self, model: &str, key: &str) -> Option<ModelRef> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let k = cache_key(model, key);
        let found = entries.get(&k).and_then(WeakModelRef::upgrade);
        if found.is_none() {
            entries.remove(&k);
        }
        found
    }

    fn set(&self, model: &str, key: &str, object: &ModelRef) {
        if !self.is_enabled() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, weak| weak.is_alive());
        entries.insert(cache_key(model, key), object.downgrade());
    }

    fn remove(&self, model: &str, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&cache_key(model, key)).is_some()
    }

    fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn len(&self) -> usize {
        self.prune();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl std::fmt::Debug for WeakCachePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakCachePool")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Guard from [`WeakCachePool::scoped_enable`].
#[must_use = "the pool is restored as soon as the guard is dropped"]
pub struct WeakCacheScope<'a> {
    pool: &'a WeakCachePool,
    previous: bool,
}

impl Drop for WeakCacheScope<'_> {
    fn drop(&mut self) {
        self.pool.set_enabled(self.previous);
    }
}
