//! Hashed chunk cache with a byte budget.
//!
//! Each decoded chunk occupies one of `nslots` hash slots. A chunk whose
//! slot is taken evicts the occupant; when the byte budget is exceeded the
//! entry with the highest eviction score goes. The cache never touches the
//! file: evicted entries are handed back to the caller, which writes the
//! dirty ones.

use std::collections::BTreeMap;

use tracing::trace;

use crate::props::ChunkCacheConfig;

/// Chunk coordinate in units of chunks.
pub type Scaled = Vec<u64>;

#[derive(Debug)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub dirty: bool,
    /// Elements touched since the chunk was loaded.
    accessed: u64,
    nelmts: u64,
    last_used: u64,
    slot: usize,
}

impl CacheEntry {
    pub fn fully_accessed(&self) -> bool {
        self.accessed >= self.nelmts
    }
}

#[derive(Debug)]
pub struct ChunkCache {
    config: ChunkCacheConfig,
    entries: BTreeMap<Scaled, CacheEntry>,
    slots: Vec<Option<Scaled>>,
    /// Shift applied before folding in each dimension's scaled offset.
    bits: Vec<u32>,
    current_bytes: usize,
    tick: u64,
}

impl ChunkCache {
    pub fn new(config: ChunkCacheConfig, bits: Vec<u32>) -> ChunkCache {
        ChunkCache {
            slots: vec![None; config.nslots],
            config,
            entries: BTreeMap::new(),
            bits,
            current_bytes: 0,
            tick: 0,
        }
    }

    pub fn config(&self) -> &ChunkCacheConfig {
        &self.config
    }

    /// Whether a chunk of `bytes` decoded bytes may be cached at all.
    pub fn admits(&self, bytes: usize) -> bool {
        self.config.nslots > 0 && bytes <= self.config.nbytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn contains(&self, scaled: &[u64]) -> bool {
        self.entries.contains_key(scaled)
    }

    fn slot_of(&self, scaled: &[u64]) -> usize {
        let Some((&first, rest)) = scaled.split_first() else {
            return 0;
        };
        let mut val = first;
        for (u, &s) in rest.iter().enumerate() {
            let shift = self.bits.get(u + 1).copied().unwrap_or(0).min(63);
            val = val.wrapping_shl(shift) ^ s;
        }
        (val % self.config.nslots.max(1) as u64) as usize
    }

    /// Look up a resident chunk and record that `nelmts` of its elements
    /// were touched.
    pub fn touch(&mut self, scaled: &[u64], nelmts: u64) -> Option<&mut CacheEntry> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(scaled)?;
        entry.last_used = tick;
        entry.accessed = entry.accessed.saturating_add(nelmts);
        Some(entry)
    }

    /// Insert a decoded chunk, returning every entry pushed out to make room.
    pub fn insert(
        &mut self,
        scaled: Scaled,
        data: Vec<u8>,
        nelmts: u64,
        dirty: bool,
    ) -> Vec<(Scaled, CacheEntry)> {
        let mut evicted = Vec::new();
        if let Some(old) = self.remove(&scaled) {
            evicted.push((scaled.clone(), old));
        }
        let slot = self.slot_of(&scaled);
        if let Some(occupant) = self.slots[slot].clone() {
            trace!(?occupant, slot, "chunk cache slot collision");
            if let Some(entry) = self.remove(&occupant) {
                evicted.push((occupant, entry));
            }
        }
        self.tick += 1;
        self.current_bytes += data.len();
        self.slots[slot] = Some(scaled.clone());
        self.entries.insert(
            scaled.clone(),
            CacheEntry {
                data,
                dirty,
                accessed: 0,
                nelmts,
                last_used: self.tick,
                slot,
            },
        );
        while self.current_bytes > self.config.nbytes {
            let Some(victim) = self.pick_victim(&scaled) else {
                break;
            };
            if let Some(entry) = self.remove(&victim) {
                trace!(?victim, "chunk cache evict");
                evicted.push((victim, entry));
            }
        }
        evicted
    }

    /// Highest-scoring entry other than `keep`. Ties prefer clean entries,
    /// then older ones, then the smallest coordinate.
    fn pick_victim(&self, keep: &[u64]) -> Option<Scaled> {
        let max_stale = self
            .entries
            .values()
            .map(|e| self.tick - e.last_used)
            .max()
            .unwrap_or(0)
            .max(1) as f64;
        let w0 = self.config.w0;
        let score = |e: &CacheEntry| {
            let full = if e.fully_accessed() { 1.0 } else { 0.0 };
            w0 * full + (1.0 - w0) * (self.tick - e.last_used) as f64 / max_stale
        };
        self.entries
            .iter()
            .filter(|(k, _)| k.as_slice() != keep)
            .max_by(|(ka, a), (kb, b)| {
                score(a)
                    .total_cmp(&score(b))
                    .then_with(|| b.dirty.cmp(&a.dirty))
                    .then_with(|| b.last_used.cmp(&a.last_used))
                    .then_with(|| kb.cmp(ka))
            })
            .map(|(k, _)| k.clone())
    }

    pub fn remove(&mut self, scaled: &[u64]) -> Option<CacheEntry> {
        let entry = self.entries.remove(scaled)?;
        self.current_bytes -= entry.data.len();
        if self.slots[entry.slot].as_deref() == Some(scaled) {
            self.slots[entry.slot] = None;
        }
        Some(entry)
    }

    /// Dirty entries in coordinate order.
    pub fn dirty_mut(&mut self) -> impl Iterator<Item = (&Scaled, &mut CacheEntry)> {
        self.entries.iter_mut().filter(|(_, e)| e.dirty)
    }

    pub fn has_dirty(&self) -> bool {
        self.entries.values().any(|e| e.dirty)
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<(Scaled, CacheEntry)> {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.current_bytes = 0;
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Remove entries matching `pred`.
    pub fn drain_where(&mut self, mut pred: impl FnMut(&[u64]) -> bool) -> Vec<(Scaled, CacheEntry)> {
        let keys: Vec<Scaled> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| self.remove(&k).map(|e| (k, e)))
            .collect()
    }

    /// Re-slot every entry under new hash bits. Entries that collide in
    /// their new slot are returned.
    pub fn rehash(&mut self, bits: Vec<u32>) -> Vec<(Scaled, CacheEntry)> {
        self.bits = bits;
        let mut evicted = Vec::new();
        let old = self.drain();
        for (scaled, entry) in old {
            let slot = self.slot_of(&scaled);
            if self.slots[slot].is_some() {
                evicted.push((scaled, entry));
                continue;
            }
            self.current_bytes += entry.data.len();
            self.slots[slot] = Some(scaled.clone());
            self.entries.insert(scaled, CacheEntry { slot, ..entry });
        }
        evicted
    }
}

/// Hash bits per dimension: `ceil(log2(chunks along the dimension))`.
pub fn hash_bits(dims: &[u64], chunk: &[u64]) -> Vec<u32> {
    dims.iter()
        .zip(chunk)
        .map(|(&d, &c)| {
            let n = d.div_ceil(c.max(1)).max(1);
            n.next_power_of_two().trailing_zeros()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(nslots: usize, nbytes: usize) -> ChunkCacheConfig {
        ChunkCacheConfig {
            nslots,
            nbytes,
            w0: 0.75,
        }
    }

    #[test]
    fn bits_follow_chunk_counts() {
        assert_eq!(hash_bits(&[100, 8], &[10, 8]), vec![4, 0]);
        assert_eq!(hash_bits(&[0], &[4]), vec![0]);
        assert_eq!(hash_bits(&[16], &[4]), vec![2]);
    }

    #[test]
    fn slot_collision_evicts_occupant() {
        let mut cache = ChunkCache::new(cfg(4, 1 << 20), vec![0]);
        assert!(cache.insert(vec![1], vec![0; 8], 8, true).is_empty());
        let out = cache.insert(vec![5], vec![0; 8], 8, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, vec![1]);
        assert!(out[0].1.dirty);
        assert!(cache.contains(&[5]));
        assert_eq!(cache.current_bytes(), 8);
    }

    #[test]
    fn budget_evicts_stalest_first() {
        let mut cache = ChunkCache::new(cfg(521, 24), vec![0]);
        cache.insert(vec![0], vec![0; 8], 8, false);
        cache.insert(vec![1], vec![0; 8], 8, false);
        cache.insert(vec![2], vec![0; 8], 8, false);
        cache.touch(&[0], 1);
        let out = cache.insert(vec![3], vec![0; 8], 8, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, vec![1]);
    }

    #[test]
    fn fully_accessed_chunks_go_first() {
        let mut cache = ChunkCache::new(cfg(521, 16), vec![0]);
        cache.insert(vec![0], vec![0; 8], 2, false);
        cache.insert(vec![1], vec![0; 8], 2, false);
        cache.touch(&[1], 2);
        let out = cache.insert(vec![2], vec![0; 8], 2, false);
        assert_eq!(out[0].0, vec![1]);
    }

    #[test]
    fn oversize_chunks_are_not_admitted() {
        let cache = ChunkCache::new(cfg(521, 16), vec![0]);
        assert!(cache.admits(16));
        assert!(!cache.admits(17));
        assert!(!ChunkCache::new(cfg(0, 16), vec![0]).admits(1));
    }

    #[test]
    fn rehash_keeps_entries() {
        let mut cache = ChunkCache::new(cfg(521, 1 << 20), vec![0, 1]);
        cache.insert(vec![0, 1], vec![1; 4], 4, true);
        cache.insert(vec![1, 0], vec![2; 4], 4, false);
        assert!(cache.rehash(vec![0, 3]).is_empty());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.dirty_mut().count(), 1);
        assert_eq!(cache.drain().len(), 2);
        assert!(cache.is_empty());
    }
}
