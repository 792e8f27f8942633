//! LRU ledger of resident tile memory

use std::collections::HashSet;

use lru::LruCache;

use super::tile::TileKey;

/// Tracks which tiles hold pixels and how many bytes they use.
///
/// The ledger only records sizes; the pixels live in the tile grids and are
/// dropped by the pool for every key returned from [`Residency::evict`].
pub struct Residency {
    ledger: LruCache<TileKey, usize>,
    bytes: usize,
    budget: usize,
}

impl Residency {
    /// Ledger holding at most `budget` bytes, `0` for unbounded
    #[must_use]
    pub fn new(budget: usize) -> Self {
        Self {
            ledger: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    /// Record a freshly stored tile, replacing any previous entry
    pub fn insert(&mut self, key: TileKey, bytes: usize) {
        if let Some(old) = self.ledger.put(key, bytes) {
            self.bytes -= old;
        }
        self.bytes += bytes;
    }

    /// Promote a tile that was just reused
    pub fn touch(&mut self, key: &TileKey) {
        self.ledger.promote(key);
    }

    /// Forget a tile whose pixels were dropped elsewhere
    pub fn remove(&mut self, key: &TileKey) {
        if let Some(bytes) = self.ledger.pop(key) {
            self.bytes -= bytes;
        }
    }

    /// Pop least recently used tiles until the ledger fits its budget.
    /// Keys in `pinned` are never returned.
    pub fn evict(&mut self, pinned: &HashSet<TileKey>) -> Vec<TileKey> {
        let mut evicted = Vec::new();
        if self.budget == 0 {
            return evicted;
        }

        let mut kept = Vec::new();
        while self.bytes > self.budget {
            let Some((key, bytes)) = self.ledger.pop_lru() else {
                break;
            };
            if pinned.contains(&key) {
                kept.push((key, bytes));
                continue;
            }
            self.bytes -= bytes;
            evicted.push(key);
        }

        // Pinned tiles were in use this frame, so they come back as most recent
        for (key, bytes) in kept {
            self.ledger.put(key, bytes);
        }

        evicted
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.ledger.clear();
        self.bytes = 0;
    }

    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.ledger.contains(key)
    }

    /// Resident bytes
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of resident tiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }
}
