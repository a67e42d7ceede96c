//! Bounded, thread-safe in-memory cache from beatmapset identifier to a
//! cached archive (or negative-cache tombstone).

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// How long a retry-hinted tombstone stays fresh before the pipeline is
/// willing to try upstream again.
pub const RETRY_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// A cached archive, or a negative-cache tombstone when `payload` is empty.
#[derive(Debug, Clone)]
pub struct CachedArchive {
    /// Display filename. Empty for tombstones.
    pub filename: String,
    /// Archive bytes. Empty marks this entry a tombstone.
    pub payload: Vec<u8>,
    /// Marks a tombstone as temporary: the pipeline may retry upstream after
    /// `RETRY_COOLDOWN` has elapsed.
    pub retry_hint: bool,
    /// Insertion time, used to age out retry-hinted tombstones.
    pub timestamp: SystemTime,
}

impl CachedArchive {
    /// Builds a successful cache entry.
    pub fn hit(filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            payload,
            retry_hint: false,
            timestamp: SystemTime::now(),
        }
    }

    /// Builds a persistent tombstone (identifier permanently unavailable).
    pub fn tombstone() -> Self {
        Self {
            filename: String::new(),
            payload: Vec::new(),
            retry_hint: false,
            timestamp: SystemTime::now(),
        }
    }

    /// Builds a retryable tombstone (identifier temporarily unavailable).
    pub fn retry_tombstone() -> Self {
        Self {
            filename: String::new(),
            payload: Vec::new(),
            retry_hint: true,
            timestamp: SystemTime::now(),
        }
    }

    /// True when this entry has no payload.
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_empty()
    }

    /// True when a retry-hinted tombstone is still within its cooldown
    /// window and should be treated as a hard miss.
    pub fn retry_still_fresh(&self) -> bool {
        self.retry_hint
            && self
                .timestamp
                .elapsed()
                .map(|age| age <= RETRY_COOLDOWN)
                .unwrap_or(true)
    }
}

/// What a cache probe resolved to, for the pipeline to act on.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A live archive was found.
    Hit(Arc<CachedArchive>),
    /// A persistent tombstone, or a retry tombstone past its cooldown: treat
    /// as a hard, final 404.
    PersistentMiss,
    /// A retry tombstone still inside its cooldown: also a 404, but the
    /// pipeline should not attempt upstream.
    RetryableMiss,
    /// Nothing cached for this identifier.
    Absent,
}

/// Bounded LRU store of `Identifier -> Arc<CachedArchive>`.
///
/// A single reader-writer lock guards both the map and its access-order
/// list; values are immutable `Arc` handles so a payload streamed out of the
/// store survives subsequent eviction.
pub struct LruStore {
    inner: RwLock<LruCache<i64, Arc<CachedArchive>>>,
}

impl LruStore {
    /// Builds a store with room for `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Looks up `id`, promoting it to most-recently-used on a hit.
    ///
    /// An expired retry-tombstone (past `RETRY_COOLDOWN`) is evicted here and
    /// reported as `Absent` rather than `PersistentMiss`, so the pipeline
    /// falls through and re-attempts upstream instead of treating a
    /// temporary failure as permanent.
    pub fn find(&self, id: i64) -> Lookup {
        let mut guard = self.inner.write();
        // Snapshot into owned data first so the mutating calls below (`get`,
        // `pop`) don't have to fight a live borrow from `peek`.
        let snapshot = guard.peek(&id).map(|archive| {
            (
                archive.is_tombstone(),
                archive.retry_hint,
                archive.retry_still_fresh(),
            )
        });
        match snapshot {
            Some((true, true, true)) => {
                // Retry tombstone still within its cooldown: a confirmed
                // miss, but not yet eligible for another upstream attempt.
                guard.get(&id);
                Lookup::RetryableMiss
            }
            Some((true, true, false)) => {
                // Cooldown elapsed: evict so the pipeline falls through and
                // re-attempts upstream instead of treating this as permanent.
                guard.pop(&id);
                Lookup::Absent
            }
            Some((true, false, _)) => {
                guard.get(&id);
                Lookup::PersistentMiss
            }
            Some((false, _, _)) => Lookup::Hit(Arc::clone(guard.get(&id).expect("just peeked"))),
            None => Lookup::Absent,
        }
    }

    /// Inserts or replaces the entry for `id`, evicting the least-recently
    /// used entry on overflow.
    pub fn insert(&self, id: i64, archive: CachedArchive) -> Arc<CachedArchive> {
        let handle = Arc::new(archive);
        let mut guard = self.inner.write();
        guard.put(id, Arc::clone(&handle));
        handle
    }

    /// Current occupancy, for the status endpoint.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find_round_trips() {
        let store = LruStore::new(2);
        store.insert(1, CachedArchive::hit("a.osz", vec![1, 2, 3]));
        match store.find(1) {
            Lookup::Hit(archive) => assert_eq!(archive.payload, vec![1, 2, 3]),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let store = LruStore::new(2);
        store.insert(1, CachedArchive::hit("a.osz", vec![1]));
        store.insert(2, CachedArchive::hit("b.osz", vec![2]));
        // touch 1 so 2 becomes the LRU entry
        let _ = store.find(1);
        store.insert(3, CachedArchive::hit("c.osz", vec![3]));
        assert!(matches!(store.find(2), Lookup::Absent));
        assert!(matches!(store.find(1), Lookup::Hit(_)));
        assert!(matches!(store.find(3), Lookup::Hit(_)));
        assert!(store.len() <= 2);
    }

    #[test]
    fn empty_payload_is_tombstone() {
        let archive = CachedArchive::tombstone();
        assert!(archive.is_tombstone());
        assert!(archive.filename.is_empty());
    }

    #[test]
    fn persistent_tombstone_is_not_retryable() {
        let store = LruStore::new(4);
        store.insert(9, CachedArchive::tombstone());
        assert!(matches!(store.find(9), Lookup::PersistentMiss));
    }

    #[test]
    fn fresh_retry_tombstone_is_retryable_miss() {
        let store = LruStore::new(4);
        store.insert(9, CachedArchive::retry_tombstone());
        assert!(matches!(store.find(9), Lookup::RetryableMiss));
    }

    #[test]
    fn expired_retry_tombstone_is_evicted_and_absent() {
        let store = LruStore::new(4);
        let mut expired = CachedArchive::retry_tombstone();
        expired.timestamp = SystemTime::now() - RETRY_COOLDOWN - Duration::from_secs(1);
        store.insert(9, expired);
        assert!(matches!(store.find(9), Lookup::Absent));
        // Evicted, not merely reported as absent once: the slot is gone.
        assert!(store.is_empty());
    }
}
