use crate::error::{ArrayError, Result};

use std::collections::HashMap;

/// Block images kept on the client to avoid READ_BLOCK round trips.
///
/// The translator never sizes or evicts a cache; it only calls these four
/// operations.
pub trait BlockCache {
    fn enabled(&self) -> bool;
    /// Copies the cached image of the block into `out`. Returns `false` on a miss.
    fn lookup(&mut self, disk: u32, block: u32, out: &mut [u8]) -> bool;
    fn insert(&mut self, disk: u32, block: u32, image: &[u8]);
    fn update(&mut self, disk: u32, block: u32, image: &[u8]);
}

/// A cache that is never enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl BlockCache for NoCache {
    fn enabled(&self) -> bool {
        false
    }

    fn lookup(&mut self, _disk: u32, _block: u32, _out: &mut [u8]) -> bool {
        false
    }

    fn insert(&mut self, _disk: u32, _block: u32, _image: &[u8]) {}

    fn update(&mut self, _disk: u32, _block: u32, _image: &[u8]) {}
}

struct Entry {
    image: Vec<u8>,
    last_access: u64,
}

/// A fixed capacity cache evicting the least recently used block.
pub struct LruCache {
    entries: HashMap<(u32, u32), Entry>,
    capacity: usize,
    /// Logical clock bumped on every access, used to order entries by recency.
    clock: u64,
    queries: u64,
    hits: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ArrayError::invalid("cache capacity must be nonzero"));
        }
        Ok(Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            clock: 0,
            queries: 0,
            hits: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, disk: u32, block: u32) -> bool {
        self.entries.contains_key(&(disk, block))
    }

    pub fn queries(&self) -> u64 {
        self.queries
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Fraction of lookups served from the cache, or 0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        if self.queries == 0 {
            0.0
        } else {
            self.hits as f64 / self.queries as f64
        }
    }

    pub fn log_hit_rate(&self) {
        info!(
            "Cache hit rate: {:.1}% ({} of {} lookups).",
            self.hit_rate() * 100.0,
            self.hits,
            self.queries
        );
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            trace!("Evicting disk {} block {} from cache.", key.0, key.1);
            self.entries.remove(&key);
        }
    }
}

impl BlockCache for LruCache {
    fn enabled(&self) -> bool {
        true
    }

    fn lookup(&mut self, disk: u32, block: u32, out: &mut [u8]) -> bool {
        self.queries += 1;
        let now = self.tick();
        match self.entries.get_mut(&(disk, block)) {
            Some(entry) => {
                entry.last_access = now;
                let n = out.len().min(entry.image.len());
                out[..n].copy_from_slice(&entry.image[..n]);
                self.hits += 1;
                true
            }
            None => false,
        }
    }

    /// Stores the image, replacing any existing copy of the block.
    fn insert(&mut self, disk: u32, block: u32, image: &[u8]) {
        let now = self.tick();
        if !self.entries.contains_key(&(disk, block)) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            (disk, block),
            Entry {
                image: image.to_vec(),
                last_access: now,
            },
        );
    }

    /// Refreshes the image of a cached block. Blocks not in the cache are ignored.
    fn update(&mut self, disk: u32, block: u32, image: &[u8]) {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(&(disk, block)) {
            entry.image.clear();
            entry.image.extend_from_slice(image);
            entry.last_access = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(LruCache::new(0).is_err());
    }

    #[test]
    fn lookup_returns_inserted_image() {
        let mut cache = LruCache::new(2).unwrap();
        let mut out = [0; 4];

        assert!(!cache.lookup(1, 2, &mut out));
        cache.insert(1, 2, &[1, 2, 3, 4]);
        assert!(cache.lookup(1, 2, &mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(cache.queries(), 2);
        assert_eq!(cache.hits(), 1);
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn least_recently_used_block_is_evicted() {
        let mut cache = LruCache::new(2).unwrap();
        let mut out = [0; 1];

        cache.insert(0, 0, &[0]);
        cache.insert(0, 1, &[1]);
        // Touch block 0 so block 1 becomes the oldest.
        assert!(cache.lookup(0, 0, &mut out));
        cache.insert(0, 2, &[2]);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(0, 0));
        assert!(!cache.contains(0, 1));
        assert!(cache.contains(0, 2));
    }

    #[test]
    fn update_only_touches_cached_blocks() {
        let mut cache = LruCache::new(4).unwrap();
        let mut out = [0; 2];

        cache.update(3, 3, &[9, 9]);
        assert!(cache.is_empty());

        cache.insert(3, 3, &[1, 1]);
        cache.update(3, 3, &[9, 9]);
        assert!(cache.lookup(3, 3, &mut out));
        assert_eq!(out, [9, 9]);
    }

    #[test]
    fn reinserting_a_block_overwrites_without_evicting() {
        let mut cache = LruCache::new(1).unwrap();
        let mut out = [0; 1];

        cache.insert(0, 0, &[1]);
        cache.insert(0, 0, &[2]);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(0, 0, &mut out));
        assert_eq!(out, [2]);
    }

    #[test]
    fn disabled_cache_never_hits() {
        let mut cache = NoCache;
        let mut out = [0; 1];
        cache.insert(0, 0, &[1]);
        assert!(!cache.enabled());
        assert!(!cache.lookup(0, 0, &mut out));
    }
}
