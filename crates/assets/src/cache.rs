use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::handle::ResourceKey;

/// Callback run once when an entry's count reaches zero.
pub type Disposer<T> = Box<dyn FnOnce(&ResourceKey, T)>;

/// Lifecycle violations. Each one means a caller's acquire/release pairing
/// is broken.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("release of '{key}' without a matching acquire")]
    ReleaseUnknown { key: ResourceKey },
    #[error("'{key}' is already cached")]
    AlreadyPresent { key: ResourceKey },
    #[error("'{key}' inserted with a reference count of zero")]
    ZeroInitialCount { key: ResourceKey },
}

/// Outcome of [`ResourceCache::release`].
#[derive(Debug, PartialEq)]
pub enum Release<T> {
    /// Other holders remain.
    Retained { remaining: u32 },
    /// That was the last reference; the entry is gone.
    Disposed(T),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub disposals: u64,
    pub promotions: u64,
    pub parked_evictions: u64,
}

struct Entry<T> {
    handle: T,
    count: u32,
    on_dispose: Option<Disposer<T>>,
}

/// Reference-counted map from resource key to handle.
///
/// Live entries are disposed synchronously when their count reaches zero.
/// Separately, results nobody claimed when they landed can be parked in a
/// small bounded area; parked handles hold no references and are promoted
/// to a live entry by the next [`acquire_existing`] of their key.
///
/// [`acquire_existing`]: ResourceCache::acquire_existing
pub struct ResourceCache<T> {
    name: &'static str,
    entries: HashMap<ResourceKey, Entry<T>>,
    parked: VecDeque<(ResourceKey, T)>,
    retain_unclaimed: usize,
    stats: CacheStats,
}

impl<T: Clone> ResourceCache<T> {
    pub fn new(name: &'static str, retain_unclaimed: usize) -> Self {
        Self {
            name,
            entries: HashMap::new(),
            parked: VecDeque::new(),
            retain_unclaimed,
            stats: CacheStats::default(),
        }
    }

    /// Take one reference to `key` if it is cached.
    pub fn acquire_existing(&mut self, key: &ResourceKey) -> Option<T> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.count += 1;
            self.stats.hits += 1;
            return Some(entry.handle.clone());
        }

        if let Some(pos) = self.parked.iter().position(|(k, _)| k == key) {
            let (key, handle) = self.parked.remove(pos)?;
            tracing::debug!(cache = self.name, %key, "promoted parked resource");
            self.stats.hits += 1;
            self.stats.promotions += 1;
            self.entries.insert(
                key,
                Entry {
                    handle: handle.clone(),
                    count: 1,
                    on_dispose: None,
                },
            );
            return Some(handle);
        }

        self.stats.misses += 1;
        None
    }

    /// Insert a freshly built resource already held by `initial_count` owners.
    pub fn insert_new(
        &mut self,
        key: ResourceKey,
        handle: T,
        initial_count: u32,
    ) -> Result<(), CacheError> {
        self.insert_entry(key, handle, initial_count, None)
    }

    /// Like [`insert_new`](Self::insert_new), running `dispose` when the last
    /// reference is released.
    pub fn insert_new_with_disposal(
        &mut self,
        key: ResourceKey,
        handle: T,
        initial_count: u32,
        dispose: impl FnOnce(&ResourceKey, T) + 'static,
    ) -> Result<(), CacheError> {
        self.insert_entry(key, handle, initial_count, Some(Box::new(dispose)))
    }

    fn insert_entry(
        &mut self,
        key: ResourceKey,
        handle: T,
        initial_count: u32,
        on_dispose: Option<Disposer<T>>,
    ) -> Result<(), CacheError> {
        if initial_count == 0 {
            return Err(CacheError::ZeroInitialCount { key });
        }
        if self.entries.contains_key(&key) {
            return Err(CacheError::AlreadyPresent { key });
        }
        self.parked.retain(|(k, _)| *k != key);
        tracing::debug!(cache = self.name, %key, count = initial_count, "inserted");
        self.stats.inserts += 1;
        self.entries.insert(
            key,
            Entry {
                handle,
                count: initial_count,
                on_dispose,
            },
        );
        Ok(())
    }

    /// Drop one reference. The last release disposes and removes the entry.
    pub fn release(&mut self, key: &ResourceKey) -> Result<Release<T>, CacheError> {
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::error!(cache = self.name, %key, "release without matching acquire");
            return Err(CacheError::ReleaseUnknown { key: key.clone() });
        };

        entry.count -= 1;
        if entry.count > 0 {
            return Ok(Release::Retained {
                remaining: entry.count,
            });
        }

        let Some(entry) = self.entries.remove(key) else {
            return Err(CacheError::ReleaseUnknown { key: key.clone() });
        };
        tracing::debug!(cache = self.name, %key, "disposed");
        self.stats.disposals += 1;
        if let Some(dispose) = entry.on_dispose {
            dispose(key, entry.handle.clone());
        }
        Ok(Release::Disposed(entry.handle))
    }

    /// Hold an unreferenced result for possible reuse. Oldest parked handles
    /// are dropped once the retention limit is exceeded.
    pub fn park(&mut self, key: ResourceKey, handle: T) {
        if self.retain_unclaimed == 0 || self.entries.contains_key(&key) {
            return;
        }
        self.parked.retain(|(k, _)| *k != key);
        tracing::debug!(cache = self.name, %key, "parked unclaimed resource");
        self.parked.push_back((key, handle));
        while self.parked.len() > self.retain_unclaimed {
            if let Some((evicted, _)) = self.parked.pop_front() {
                tracing::trace!(cache = self.name, key = %evicted, "evicted parked resource");
                self.stats.parked_evictions += 1;
            }
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Look at a live entry without taking a reference.
    pub fn get(&self, key: &ResourceKey) -> Option<&T> {
        self.entries.get(key).map(|e| &e.handle)
    }

    /// Current reference count of a live entry.
    pub fn ref_count(&self, key: &ResourceKey) -> Option<u32> {
        self.entries.get(key).map(|e| e.count)
    }

    pub fn is_parked(&self, key: &ResourceKey) -> bool {
        self.parked.iter().any(|(k, _)| k == key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
