//! Cache entry: a fingerprint bound to one streaming message buffer.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use bytes::Bytes;

use crate::message::MessageBuffer;
use crate::time;

/// One keyed slot in the cache. The entry exclusively owns its message
/// buffer; the producer fills the buffer while any number of consumers
/// stream from it through a shared `Arc<CacheEntry>`.
pub struct CacheEntry {
    fingerprint: Bytes,
    body: MessageBuffer,
    deleted: AtomicBool,
    last_access: AtomicI64,
}

impl CacheEntry {
    /// Creates an entry for the given fingerprint. The fingerprint bytes
    /// are copied, never borrowed from the request buffer.
    pub fn new(fingerprint: &[u8]) -> Self {
        Self {
            fingerprint: Bytes::copy_from_slice(fingerprint),
            body: MessageBuffer::new(),
            deleted: AtomicBool::new(false),
            last_access: AtomicI64::new(time::now_millis()),
        }
    }

    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    /// Cheap owned handle to the fingerprint (refcounted, no copy).
    pub fn fingerprint_bytes(&self) -> Bytes {
        self.fingerprint.clone()
    }

    pub fn body(&self) -> &MessageBuffer {
        &self.body
    }

    /// True once the entry has been unlinked from its bucket. A reader
    /// holding a stale reference uses this to detect the race.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Refreshes the last-access stamp. Atomic, so a cache hit can touch
    /// the entry while holding only the bucket read lock.
    pub(crate) fn touch(&self) {
        self.last_access.store(time::now_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since the last access, as seen from `now_ms`.
    pub(crate) fn idle_millis(&self, now_ms: i64) -> i64 {
        now_ms - self.last_access.load(Ordering::Relaxed)
    }
}
