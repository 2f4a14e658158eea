//! Metadata Cache - reference-counted, hash-keyed cache of decoded metadata
//!
//! **Purpose**: hand out decoded descriptors without re-reading the catalog
//! on every statement, while guaranteeing an entry is never destroyed while
//! any caller still holds it.
//!
//! Destruction is gated purely on the reference count, never on call-stack
//! position. Entry construction may re-enter the cache layer (a catalog read
//! can process pending invalidations), so the create/update callbacks run
//! without the store lock held and an invalidation that arrives mid-fetch
//! only decrements the count; the caller's pin keeps the cache alive until
//! released.
//!
//! Every `pin` must be paired with exactly one `release`. The [`PinTracker`]
//! is the safety net: the owning session sweeps it at unit-of-work
//! boundaries so an abort can never leak a pin.

use crate::config::LeakPolicy;
use crate::error::{MetaError, Result};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds a missing entry from its key. `Ok(None)` means the key does not
/// name an entry at all; nothing is inserted.
pub type CreateEntryFn<K, V> = Box<dyn Fn(&K) -> Result<Option<Arc<V>>> + Send + Sync>;

/// Refreshes an existing entry on a hit. The returned entry replaces the
/// stored one.
pub type UpdateEntryFn<K, V> = Box<dyn Fn(&K, Arc<V>) -> Result<Arc<V>> + Send + Sync>;

/// Runs once, right before the backing store is torn down.
pub type PreDestroyFn = Box<dyn Fn() + Send + Sync>;

/// Cache statistics snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Current number of live entries
    pub entries: u64,
}

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

/// Reference-counted, hash-keyed cache of opaque payloads.
///
/// Lifecycle: created uninitialized, `init` allocates the store and sets the
/// creator's implicit reference (`refcount = 1`). Consumers `pin`/`release`
/// around use; the owner calls `invalidate` when the underlying data source
/// goes stale. The store is torn down by whichever decrement brings the
/// count to zero.
pub struct MetadataCache<K, V> {
    name: String,
    id: u64,
    store: RwLock<Option<AHashMap<K, Arc<V>>>>,
    refcount: AtomicI64,
    release_on_commit: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    entries: AtomicU64,
    create_entry: Option<CreateEntryFn<K, V>>,
    update_entry: Option<UpdateEntryFn<K, V>>,
    pre_destroy: Option<PreDestroyFn>,
}

impl<K, V> MetadataCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create an uninitialized cache. `init` must run before `fetch`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            store: RwLock::new(None),
            refcount: AtomicI64::new(0),
            release_on_commit: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            create_entry: None,
            update_entry: None,
            pre_destroy: None,
        }
    }

    pub fn with_create_entry(mut self, f: CreateEntryFn<K, V>) -> Self {
        self.create_entry = Some(f);
        self
    }

    pub fn with_update_entry(mut self, f: UpdateEntryFn<K, V>) -> Self {
        self.update_entry = Some(f);
        self
    }

    pub fn with_pre_destroy(mut self, f: PreDestroyFn) -> Self {
        self.pre_destroy = Some(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocate the backing store and take the creator's reference.
    pub fn init(&self) -> Result<()> {
        let mut store = self.store.write();
        if store.is_some() {
            return Err(MetaError::AlreadyInitialized(self.name.clone()));
        }
        *store = Some(AHashMap::new());
        self.refcount.store(1, Ordering::SeqCst);
        self.release_on_commit.store(true, Ordering::SeqCst);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.entries.store(0, Ordering::Relaxed);
        debug!(cache = %self.name, "cache initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read().is_some()
    }

    /// Caches that legitimately stay pinned across a commit (multi-transaction
    /// operations) opt out of the commit-time sweep.
    pub fn set_release_on_commit(&self, release: bool) {
        self.release_on_commit.store(release, Ordering::SeqCst);
    }

    /// Current reference count. Mostly useful in tests and assertions.
    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Look up `key`.
    ///
    /// Hit: the hit counter is bumped and, when an update callback is
    /// configured, the entry is refreshed in place. Miss: the miss counter
    /// is bumped and, when a create callback is configured, the entry is
    /// built and inserted. Without callbacks a miss is simply `None`.
    pub fn fetch(&self, key: &K) -> Result<Option<Arc<V>>> {
        let existing = {
            let guard = self.store.read();
            let map = guard
                .as_ref()
                .ok_or_else(|| MetaError::UninitializedCache(self.name.clone()))?;
            map.get(key).cloned()
        };

        match existing {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                match &self.update_entry {
                    Some(update) => {
                        // Callback runs unlocked; it may re-enter the cache
                        // layer or invalidate this very cache.
                        let refreshed = update(key, entry)?;
                        let mut guard = self.store.write();
                        let map = guard
                            .as_mut()
                            .ok_or_else(|| MetaError::UninitializedCache(self.name.clone()))?;
                        map.insert(key.clone(), refreshed.clone());
                        Ok(Some(refreshed))
                    }
                    None => Ok(Some(entry)),
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let create = match &self.create_entry {
                    Some(create) => create,
                    None => return Ok(None),
                };
                match create(key)? {
                    Some(built) => {
                        let mut guard = self.store.write();
                        let map = guard
                            .as_mut()
                            .ok_or_else(|| MetaError::UninitializedCache(self.name.clone()))?;
                        // A re-entrant fetch may have inserted the key while
                        // the callback ran; only count a fresh slot.
                        if map.insert(key.clone(), built.clone()).is_none() {
                            self.entries.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Some(built))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Evict a single entry. Does not touch the reference count.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let mut guard = self.store.write();
        let map = guard
            .as_mut()
            .ok_or_else(|| MetaError::UninitializedCache(self.name.clone()))?;
        let found = map.remove(key).is_some();
        if found {
            self.entries.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    /// Owner-side decrement: the data source signalled this cache is stale.
    /// Same destroy-if-zero semantics as `release`, but no pin is involved.
    pub fn invalidate(&self) {
        let prev = self.refcount.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "invalidate on cache {} with refcount {}", self.name, prev);
        self.destroy_if_unreferenced();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
        }
    }

    fn destroy_if_unreferenced(&self) {
        if self.refcount.load(Ordering::SeqCst) > 0 {
            // will be destroyed by a later decrement
            return;
        }
        if self.store.read().is_none() {
            return;
        }
        if let Some(hook) = &self.pre_destroy {
            hook();
        }
        *self.store.write() = None;
        debug!(cache = %self.name, "cache destroyed");
    }
}

impl<K, V> MetadataCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Take a reference that survives invalidation events, recording it with
    /// the tracker so the unit-of-work safety net can reclaim it. Returns
    /// the cache itself for chaining. Pair with exactly one `release`.
    pub fn pin(self: &Arc<Self>, tracker: &PinTracker) -> Arc<Self> {
        self.refcount.fetch_add(1, Ordering::SeqCst);
        tracker.record(Arc::clone(self) as Arc<dyn PinnedCache>);
        Arc::clone(self)
    }

    /// Drop one pinned reference. Returns the count remaining after the
    /// decrement so the caller can detect "this was the last reference".
    pub fn release(&self, tracker: &PinTracker) -> Result<i64> {
        let prev = self.refcount.load(Ordering::SeqCst);
        if prev <= 0 {
            return Err(MetaError::RefcountUnderflow(self.name.clone()));
        }
        self.refcount.fetch_sub(1, Ordering::SeqCst);
        tracker.forget_one(self.id);
        self.destroy_if_unreferenced();
        Ok(prev - 1)
    }
}

/// Pin-list view of a cache, independent of its key/value types.
pub trait PinnedCache: Send + Sync {
    fn cache_id(&self) -> u64;
    fn cache_name(&self) -> &str;
    fn release_on_commit(&self) -> bool;
    /// Decrement and destroy-if-zero without touching any pin list. Used by
    /// the safety net, which drains records itself.
    fn unpin(&self);
}

impl<K, V> PinnedCache for MetadataCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn cache_id(&self) -> u64 {
        self.id
    }

    fn cache_name(&self) -> &str {
        &self.name
    }

    fn release_on_commit(&self) -> bool {
        self.release_on_commit.load(Ordering::SeqCst)
    }

    fn unpin(&self) {
        self.refcount.fetch_sub(1, Ordering::SeqCst);
        self.destroy_if_unreferenced();
    }
}

struct PinRecord {
    cache: Arc<dyn PinnedCache>,
    /// Unit-of-work nesting depth at pin time (0 = top level)
    depth: usize,
}

/// Unit-of-work-scoped pin list.
///
/// One record exists for every outstanding pin, so the same cache may appear
/// multiple times. Populated by `pin`, drained by `release`, and swept by
/// the owning session at commit/abort boundaries.
pub struct PinTracker {
    records: Mutex<Vec<PinRecord>>,
    depth: AtomicUsize,
}

impl Default for PinTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PinTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            depth: AtomicUsize::new(0),
        }
    }

    /// Number of outstanding pin records.
    pub fn outstanding(&self) -> usize {
        self.records.lock().len()
    }

    /// Current nesting depth, maintained by the owning session.
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub(crate) fn enter_nested(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn exit_nested(&self) {
        let prev = self.depth.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "exit_nested below depth 0");
    }

    fn record(&self, cache: Arc<dyn PinnedCache>) {
        let depth = self.depth.load(Ordering::SeqCst);
        self.records.lock().push(PinRecord { cache, depth });
    }

    /// Remove the most recent record for `cache_id`. The refcount side is
    /// handled by the caller (`MetadataCache::release`).
    fn forget_one(&self, cache_id: u64) -> bool {
        let mut records = self.records.lock();
        if let Some(pos) = records.iter().rposition(|r| r.cache.cache_id() == cache_id) {
            records.remove(pos);
            true
        } else {
            false
        }
    }

    /// Abort path: unconditionally unwind every record at or below the
    /// aborted unit, regardless of `release_on_commit`. Aborts always win.
    pub(crate) fn sweep_abort(&self, from_depth: usize) {
        let drained: Vec<PinRecord> = {
            let mut records = self.records.lock();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for record in records.drain(..) {
                if record.depth >= from_depth {
                    dropped.push(record);
                } else {
                    kept.push(record);
                }
            }
            *records = kept;
            dropped
        };
        for record in &drained {
            record.cache.unpin();
        }
    }

    /// Commit of the top-level unit: records on `release_on_commit` caches
    /// are leaked pins (a call site forgot its release) and are reclaimed
    /// per policy; records on opted-out caches survive into the next unit.
    pub(crate) fn sweep_commit(&self, policy: LeakPolicy) {
        let leaked: Vec<PinRecord> = {
            let mut records = self.records.lock();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for record in records.drain(..) {
                if record.cache.release_on_commit() {
                    dropped.push(record);
                } else {
                    kept.push(record);
                }
            }
            *records = kept;
            dropped
        };
        for record in &leaked {
            let name = record.cache.cache_name().to_string();
            if policy == LeakPolicy::Panic {
                panic!("cache {name} still pinned at commit");
            }
            warn!(cache = %name, "cache still pinned at commit, releasing");
            record.cache.unpin();
        }
    }

    /// Commit of a nested unit: pins taken within it must already be gone.
    /// Survivors are forced out like an abort, with a warning.
    pub(crate) fn sweep_subcommit(&self, depth: usize) {
        let survivors: Vec<PinRecord> = {
            let mut records = self.records.lock();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for record in records.drain(..) {
                if record.depth >= depth {
                    dropped.push(record);
                } else {
                    kept.push(record);
                }
            }
            *records = kept;
            dropped
        };
        for record in &survivors {
            warn!(
                cache = %record.cache.cache_name(),
                "cache pinned across nested unit completion, forcing release"
            );
            record.cache.unpin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted_cache(
        destroyed: Arc<AtomicUsize>,
    ) -> Arc<MetadataCache<u64, String>> {
        let cache = MetadataCache::new("test")
            .with_create_entry(Box::new(|key: &u64| Ok(Some(Arc::new(format!("entry-{key}"))))))
            .with_pre_destroy(Box::new(move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
            }));
        cache.init().unwrap();
        Arc::new(cache)
    }

    #[test]
    fn test_init_twice_fails() {
        let cache: MetadataCache<u64, String> = MetadataCache::new("dup");
        cache.init().unwrap();
        assert!(matches!(
            cache.init(),
            Err(MetaError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_fetch_before_init_fails() {
        let cache: MetadataCache<u64, String> = MetadataCache::new("early");
        assert!(matches!(
            cache.fetch(&1),
            Err(MetaError::UninitializedCache(_))
        ));
    }

    #[test]
    fn test_fetch_miss_then_hit_counters() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed);

        let first = cache.fetch(&7).unwrap().unwrap();
        assert_eq!(*first, "entry-7");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (0, 1, 1));

        let second = cache.fetch(&7).unwrap().unwrap();
        assert_eq!(*second, "entry-7");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_fetch_without_create_callback_returns_none() {
        let cache: MetadataCache<u64, String> = MetadataCache::new("bare");
        cache.init().unwrap();
        assert!(cache.fetch(&1).unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_update_entry_refreshes_on_hit() {
        let cache: MetadataCache<u64, u64> = MetadataCache::new("fresh")
            .with_create_entry(Box::new(|_| Ok(Some(Arc::new(0)))))
            .with_update_entry(Box::new(|_, old: Arc<u64>| Ok(Arc::new(*old + 1))));
        cache.init().unwrap();

        assert_eq!(*cache.fetch(&1).unwrap().unwrap(), 0);
        assert_eq!(*cache.fetch(&1).unwrap().unwrap(), 1);
        assert_eq!(*cache.fetch(&1).unwrap().unwrap(), 2);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_remove_semantics() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed);
        cache.fetch(&1).unwrap();
        cache.fetch(&2).unwrap();
        assert_eq!(cache.stats().entries, 2);

        assert!(cache.remove(&1).unwrap());
        assert_eq!(cache.stats().entries, 1);
        assert!(!cache.remove(&1).unwrap());
        assert_eq!(cache.stats().entries, 1);
        // refcount untouched by entry eviction
        assert_eq!(cache.refcount(), 1);
    }

    #[test]
    fn test_refcount_algebra_and_single_destruction() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed.clone());
        let tracker = PinTracker::new();

        let pins = 3;
        for _ in 0..pins {
            cache.pin(&tracker);
        }
        assert_eq!(cache.refcount(), 1 + pins);
        assert_eq!(tracker.outstanding(), pins as usize);

        for _ in 0..pins {
            cache.release(&tracker).unwrap();
        }
        assert_eq!(cache.refcount(), 1);
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        // owner invalidation takes the last reference
        cache.invalidate();
        assert_eq!(cache.refcount(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!cache.is_initialized());
    }

    #[test]
    fn test_destruction_deferred_to_last_release() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed.clone());
        let tracker = PinTracker::new();

        cache.pin(&tracker);
        cache.invalidate();
        // pin still outstanding, destruction must wait
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert!(cache.is_initialized());

        let remaining = cache.release(&tracker).unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_without_pin_fails_fast() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed);
        let tracker = PinTracker::new();
        cache.invalidate();
        assert!(matches!(
            cache.release(&tracker),
            Err(MetaError::RefcountUnderflow(_))
        ));
    }

    #[test]
    fn test_reentrant_invalidation_during_create() {
        // The create callback invalidates the cache it is populating; the
        // caller's pin keeps the store alive until released.
        let destroyed = Arc::new(AtomicUsize::new(0));
        let destroyed_hook = destroyed.clone();
        let cache: Arc<MetadataCache<u64, String>> = Arc::new_cyclic(|weak: &std::sync::Weak<MetadataCache<u64, String>>| {
            let weak = weak.clone();
            MetadataCache::new("reentrant")
                .with_create_entry(Box::new(move |key: &u64| {
                    if let Some(cache) = weak.upgrade() {
                        cache.invalidate();
                    }
                    Ok(Some(Arc::new(format!("entry-{key}"))))
                }))
                .with_pre_destroy(Box::new(move || {
                    destroyed_hook.fetch_add(1, Ordering::SeqCst);
                }))
        });
        cache.init().unwrap();

        let tracker = PinTracker::new();
        let pinned = cache.pin(&tracker);
        let entry = pinned.fetch(&1).unwrap().unwrap();
        assert_eq!(*entry, "entry-1");
        // the invalidation consumed the owner reference, not ours
        assert_eq!(pinned.refcount(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        pinned.release(&tracker).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_sweep_unwinds_all_pins() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache_a = counted_cache(destroyed.clone());
        let cache_b = counted_cache(destroyed.clone());
        let tracker = PinTracker::new();

        cache_a.pin(&tracker);
        cache_a.pin(&tracker);
        cache_b.pin(&tracker);
        assert_eq!(tracker.outstanding(), 3);

        tracker.sweep_abort(0);
        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(cache_a.refcount(), 1);
        assert_eq!(cache_b.refcount(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_commit_sweep_respects_release_on_commit_false() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let keep = counted_cache(destroyed.clone());
        keep.set_release_on_commit(false);
        let leak = counted_cache(destroyed.clone());
        let tracker = PinTracker::new();

        keep.pin(&tracker);
        leak.pin(&tracker);

        tracker.sweep_commit(LeakPolicy::Warn);
        // the opted-out pin survives, the leaked one was reclaimed
        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(keep.refcount(), 2);
        assert_eq!(leak.refcount(), 1);
    }

    #[test]
    #[should_panic(expected = "still pinned at commit")]
    fn test_commit_sweep_panics_under_strict_policy() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed);
        let tracker = PinTracker::new();
        cache.pin(&tracker);
        tracker.sweep_commit(LeakPolicy::Panic);
    }

    #[test]
    fn test_nested_sweeps_only_touch_inner_pins() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let cache = counted_cache(destroyed);
        let tracker = PinTracker::new();

        cache.pin(&tracker); // depth 0
        tracker.enter_nested();
        cache.pin(&tracker); // depth 1
        cache.pin(&tracker); // depth 1

        tracker.sweep_abort(tracker.current_depth());
        tracker.exit_nested();

        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(cache.refcount(), 2);

        cache.release(&tracker).unwrap();
        assert_eq!(cache.refcount(), 1);
    }
}
