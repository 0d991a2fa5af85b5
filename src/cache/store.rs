//! Fixed-bucket hash table with chained entries and TTL bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use super::entry::CacheEntry;
use super::evictor;
use crate::message::FailReason;
use crate::time;

/// Result of asking the cache to admit a request for a fingerprint.
pub enum Admission {
    /// The caller won the slot: it must fill the entry's buffer and
    /// finalize or fail it.
    Producer(Arc<CacheEntry>),
    /// Another producer already owns the fingerprint; stream from it.
    Consumer(Arc<CacheEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache capacity must be non-zero")]
    ZeroCapacity,
    #[error("failed to spawn evictor thread: {0}")]
    Evictor(#[from] std::io::Error),
}

/// Rolling polynomial hash over the fingerprint, reduced per byte:
/// `h = (h*31 + byte) mod capacity`. Weak on purpose; chaining absorbs
/// collisions.
pub(crate) fn bucket_of(fingerprint: &[u8], capacity: usize) -> usize {
    let mut h: usize = 0;
    for &byte in fingerprint {
        h = (h.wrapping_mul(31).wrapping_add(byte as usize)) % capacity;
    }
    h
}

/// Bucket array plus evictor coordination, shared between the cache
/// handle and the evictor thread.
pub(crate) struct Shared {
    buckets: Box<[RwLock<Vec<Arc<CacheEntry>>>]>,
    ttl: Duration,
    pub(crate) stop: Mutex<bool>,
    pub(crate) wake: Condvar,
}

impl Shared {
    fn new(capacity: usize, ttl: Duration) -> Self {
        let buckets = (0..capacity)
            .map(|_| RwLock::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            ttl,
            stop: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    fn bucket(&self, fingerprint: &[u8]) -> &RwLock<Vec<Arc<CacheEntry>>> {
        &self.buckets[bucket_of(fingerprint, self.buckets.len())]
    }

    fn get(&self, fingerprint: &[u8]) -> Option<Arc<CacheEntry>> {
        let chain = self.bucket(fingerprint).read();
        for entry in chain.iter() {
            if entry.fingerprint() == fingerprint && !entry.is_deleted() {
                entry.touch();
                return Some(Arc::clone(entry));
            }
        }
        None
    }

    fn add(&self, entry: Arc<CacheEntry>) {
        let mut chain = self.bucket(entry.fingerprint()).write();
        chain.insert(0, entry);
    }

    fn lookup_or_insert(&self, fingerprint: &[u8]) -> Admission {
        let mut chain = self.bucket(fingerprint).write();
        for entry in chain.iter() {
            if entry.fingerprint() == fingerprint && !entry.is_deleted() {
                entry.touch();
                return Admission::Consumer(Arc::clone(entry));
            }
        }
        let entry = Arc::new(CacheEntry::new(fingerprint));
        chain.insert(0, Arc::clone(&entry));
        debug!("new cache entry added");
        Admission::Producer(entry)
    }

    fn delete(&self, fingerprint: &[u8]) -> DeleteOutcome {
        let mut chain = self.bucket(fingerprint).write();
        match chain
            .iter()
            .position(|e| e.fingerprint() == fingerprint && !e.is_deleted())
        {
            Some(pos) => {
                chain[pos].mark_deleted();
                chain.remove(pos);
                debug!("cache entry deleted");
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::NotFound,
        }
    }

    fn remove(&self, target: &Arc<CacheEntry>) -> DeleteOutcome {
        let mut chain = self.bucket(target.fingerprint()).write();
        match chain.iter().position(|e| Arc::ptr_eq(e, target)) {
            Some(pos) => {
                chain[pos].mark_deleted();
                chain.remove(pos);
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::NotFound,
        }
    }

    /// Delete path used by the evictor: unlink only if the entry is still
    /// idle past the TTL under the write lock, so a hit that refreshed
    /// the stamp after sweep collection keeps its entry.
    pub(crate) fn evict_expired(&self, fingerprint: &[u8], now_ms: i64) -> DeleteOutcome {
        let ttl_ms = self.ttl.as_millis() as i64;
        let mut chain = self.bucket(fingerprint).write();
        match chain.iter().position(|e| {
            e.fingerprint() == fingerprint && !e.is_deleted() && e.idle_millis(now_ms) >= ttl_ms
        }) {
            Some(pos) => {
                chain[pos].mark_deleted();
                chain.remove(pos);
                debug!("expired cache entry removed");
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::NotFound,
        }
    }

    /// One full pass over all buckets. Returns the number of entries the
    /// pass removed.
    pub(crate) fn sweep(&self) -> usize {
        let now_ms = time::now_millis();
        let ttl_ms = self.ttl.as_millis() as i64;

        let mut expired: Vec<Bytes> = Vec::new();
        for bucket in self.buckets.iter() {
            let chain = bucket.read();
            for entry in chain.iter() {
                if entry.idle_millis(now_ms) >= ttl_ms {
                    expired.push(entry.fingerprint_bytes());
                }
            }
        }

        let mut removed = 0;
        for fingerprint in expired {
            if self.evict_expired(&fingerprint, now_ms) == DeleteOutcome::Deleted {
                removed += 1;
            }
        }
        removed
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// Unlinks every entry and fails still-producing buffers so blocked
    /// consumers drain. Returns the number of entries removed.
    fn drain(&self) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.iter() {
            let mut chain = bucket.write();
            for entry in chain.drain(..) {
                entry.mark_deleted();
                entry.body().fail(FailReason::Shutdown);
                removed += 1;
            }
        }
        removed
    }
}

/// Concurrent response cache: fixed bucket count, per-bucket read/write
/// locking, and a background evictor that removes entries idle past the
/// TTL. Entries are never relocated; `Arc` keeps an unlinked entry alive
/// until the last producer or consumer drops it.
pub struct Cache {
    shared: Arc<Shared>,
    evictor: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Cache {
    /// Creates the cache and spawns its evictor thread.
    pub fn new(capacity: usize, ttl: Duration) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        let shared = Arc::new(Shared::new(capacity, ttl));
        let handle = evictor::spawn(Arc::clone(&shared))?;
        info!(capacity, ttl_ms = ttl.as_millis() as u64, "cache created");
        Ok(Self {
            shared,
            evictor: Mutex::new(Some(handle)),
        })
    }

    /// Looks up a fingerprint, refreshing its last-access stamp on a hit.
    pub fn get(&self, fingerprint: &[u8]) -> Option<Arc<CacheEntry>> {
        self.shared.get(fingerprint)
    }

    /// Installs an entry at the head of its bucket. Duplicate
    /// fingerprints are permitted at this level; use
    /// [`Cache::lookup_or_insert`] when uniqueness matters.
    pub fn add(&self, entry: Arc<CacheEntry>) {
        self.shared.add(entry);
    }

    /// Hit-or-producer decision in one critical section: at most one
    /// caller per fingerprint ever becomes the producer, every racer
    /// becomes a consumer of the same entry.
    pub fn lookup_or_insert(&self, fingerprint: &[u8]) -> Admission {
        self.shared.lookup_or_insert(fingerprint)
    }

    /// Unlinks the entry matching the fingerprint.
    pub fn delete(&self, fingerprint: &[u8]) -> DeleteOutcome {
        self.shared.delete(fingerprint)
    }

    /// Unlinks exactly this entry (pointer identity), so a failed
    /// producer never removes a successor that reused its fingerprint.
    pub fn remove(&self, entry: &Arc<CacheEntry>) -> DeleteOutcome {
        self.shared.remove(entry)
    }

    /// Total number of live entries across all buckets.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops and joins the evictor, then drains every chain. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut stop = self.shared.stop.lock();
            if *stop {
                return;
            }
            *stop = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.evictor.lock().take() {
            let _ = handle.join();
        }
        let drained = self.shared.drain();
        info!(entries = drained, "cache destroyed");
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
