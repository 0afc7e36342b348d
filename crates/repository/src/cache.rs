use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tcc_metrics::MetricsCollector;
use tcc_types::Participant;
use tracing::{debug, warn};

use crate::store::TransactionStore;

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Store loads issued on a miss, failed ones included
    pub loads: u64,
    pub load_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
}

/// Bounded LRU of participant lists keyed by transaction id.
///
/// Holds at most `max_entries` transactions. A failed store load yields an
/// empty list that is not cached, so an empty result means "unknown", never
/// "no participants".
pub struct ParticipantCache {
    entries: Mutex<LruCache<String, Vec<Participant>>>,
    store: Arc<dyn TransactionStore>,
    counters: Counters,
    metrics: MetricsCollector,
}

impl ParticipantCache {
    pub fn new(store: Arc<dyn TransactionStore>, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            store,
            counters: Counters::default(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Participants of `key`, loading from the store on a miss
    pub async fn get(&self, key: &str) -> Vec<Participant> {
        if let Some(cached) = self.entries.lock().get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_cache_hit();
            return cached.clone();
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_cache_miss();

        let Some(loaded) = self.load(key).await else {
            return Vec::new();
        };
        if loaded.is_empty() {
            return loaded;
        }

        let mut entries = self.entries.lock();
        // A put that raced the load already holds the newer list
        if let Some(current) = entries.get(key) {
            return current.clone();
        }
        entries.put(key.to_string(), loaded.clone());
        loaded
    }

    /// Append `participant` to the list cached under `key`, replacing an
    /// entry with the same participant id.
    ///
    /// On a miss the list is seeded from the store first so the new entry does
    /// not hide participants that are already persisted. If that load fails
    /// nothing is cached and the next `get` reloads.
    pub async fn put(&self, key: &str, participant: Participant) {
        {
            let mut entries = self.entries.lock();
            if let Some(list) = entries.get_mut(key) {
                upsert(list, participant);
                return;
            }
        }

        let Some(mut seeded) = self.load(key).await else {
            return;
        };

        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(list) => upsert(list, participant),
            None => {
                upsert(&mut seeded, participant);
                entries.put(key.to_string(), seeded);
            }
        }
    }

    /// Replace a cached participant in place. Does nothing if `key` is not cached.
    pub fn update(&self, key: &str, participant: Participant) {
        if let Some(list) = self.entries.lock().get_mut(key) {
            upsert(list, participant);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries.lock().pop(key).is_some() {
            debug!(trans_id = %key, "Invalidated participant cache entry");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
        }
    }

    async fn load(&self, key: &str) -> Option<Vec<Participant>> {
        self.counters.loads.fetch_add(1, Ordering::Relaxed);
        match self.store.find_participants(key).await {
            Ok(participants) => Some(participants),
            Err(e) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache_load_failure();
                warn!(trans_id = %key, error = %e, "Participant load failed");
                None
            }
        }
    }
}

fn upsert(list: &mut Vec<Participant>, participant: Participant) {
    match list
        .iter_mut()
        .find(|p| p.participant_id == participant.participant_id)
    {
        Some(existing) => *existing = participant,
        None => list.push(participant),
    }
}
