use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::{sync::Cache as MokaCache, Expiry};

use crate::error::CacheError;

/// The dedup cache used by the report event handler.
pub trait Cache: Send + Sync {
    /// Returns the value stored under `key`, or `CacheError::NotFound`.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, CacheError>;
    /// Stores `value` under `key` for `expire_seconds`. Zero means the entry never expires.
    fn set(&self, key: &[u8], value: &[u8], expire_seconds: u64) -> Result<(), CacheError>;
    /// Removes `key`, returning true if a live entry was removed.
    fn del(&self, key: &[u8]) -> bool;
    /// Seconds left before `key` expires.
    fn ttl(&self, key: &[u8]) -> Result<u64, CacheError>;
}

/// A cache that can be dropped wholesale, used by the `/dropcache` endpoint.
pub trait ClearableCache: Send + Sync {
    fn clear(&self);
}

#[derive(Clone)]
struct Entry {
    value: Arc<[u8]>,
    ttl: Option<Duration>,
    inserted_at: Instant,
}

impl Entry {
    fn remaining(&self) -> Option<Duration> {
        self.ttl
            .map(|ttl| ttl.saturating_sub(self.inserted_at.elapsed()))
    }
}

/// Expires every entry after the ttl it was set with.
struct PerEntryExpiry;

impl Expiry<Vec<u8>, Entry> for PerEntryExpiry {
    fn expire_after_create(&self, _key: &Vec<u8>, value: &Entry, _: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &Vec<u8>,
        value: &Entry,
        _: Instant,
        _: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process byte cache bounded by the total size of its keys and values.
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<Vec<u8>, Entry>,
}

impl MemoryCache {
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_size_bytes)
            .weigher(|key: &Vec<u8>, entry: &Entry| -> u32 {
                (key.len() + entry.value.len())
                    .try_into()
                    .unwrap_or(u32::MAX)
            })
            .expire_after(PerEntryExpiry)
            .build();

        Self { cache }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("cache", &"<moka cache>")
            .finish()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, CacheError> {
        self.cache
            .get(key)
            .map(|entry| entry.value.to_vec())
            .ok_or(CacheError::NotFound)
    }

    fn set(&self, key: &[u8], value: &[u8], expire_seconds: u64) -> Result<(), CacheError> {
        let ttl = (expire_seconds > 0).then(|| Duration::from_secs(expire_seconds));
        self.cache.insert(
            key.to_vec(),
            Entry {
                value: value.into(),
                ttl,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn del(&self, key: &[u8]) -> bool {
        self.cache.remove(key).is_some()
    }

    fn ttl(&self, key: &[u8]) -> Result<u64, CacheError> {
        let entry = self.cache.get(key).ok_or(CacheError::NotFound)?;
        Ok(entry.remaining().map(|d| d.as_secs()).unwrap_or(0))
    }
}

impl ClearableCache for MemoryCache {
    fn clear(&self) {
        self.cache.invalidate_all();
    }
}
