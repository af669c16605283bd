//! Open-dataset registry.
//!
//! Every open dataset has exactly one entry, keyed by the file it lives in
//! and its object header address. Handles hold a [`DatasetId`] and look the
//! shared state up here; the entry counts the live handles.

use std::collections::HashMap;
use std::path::PathBuf;

use h5core_io::FileIdentity;

/// Arena index of a registry entry. The generation guards against a stale
/// id reaching a slot that was reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId {
    index: u32,
    generation: u32,
}

pub(crate) type DatasetKey = (FileIdentity, u64);

pub(crate) struct Entry<S> {
    pub key: DatasetKey,
    pub shared: S,
    /// Live handles. Zero while the last handle is closing.
    pub count: usize,
    /// External-file prefix the dataset was opened with.
    pub efile_prefix: Option<PathBuf>,
}

struct Slot<S> {
    generation: u32,
    entry: Option<Entry<S>>,
}

pub(crate) struct Registry<S> {
    slots: Vec<Slot<S>>,
    free: Vec<u32>,
    by_key: HashMap<DatasetKey, u32>,
}

impl<S: Clone> Registry<S> {
    pub fn new() -> Registry<S> {
        Registry {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Add an entry with one handle.
    pub fn insert(
        &mut self,
        key: DatasetKey,
        shared: S,
        efile_prefix: Option<PathBuf>,
    ) -> DatasetId {
        let entry = Entry {
            key,
            shared,
            count: 1,
            efile_prefix,
        };
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.by_key.insert(key, index);
        DatasetId {
            index,
            generation: slot.generation,
        }
    }

    pub fn lookup(&self, key: &DatasetKey) -> Option<DatasetId> {
        let index = *self.by_key.get(key)?;
        Some(DatasetId {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn get(&self, id: DatasetId) -> Option<&Entry<S>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: DatasetId) -> Option<&mut Entry<S>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Count one more handle.
    pub fn acquire(&mut self, id: DatasetId) -> Option<usize> {
        let entry = self.get_mut(id)?;
        entry.count += 1;
        Some(entry.count)
    }

    /// Count one handle fewer, returning the remaining count.
    pub fn release(&mut self, id: DatasetId) -> Option<usize> {
        let entry = self.get_mut(id)?;
        entry.count = entry.count.saturating_sub(1);
        Some(entry.count)
    }

    /// Drop the entry and retire its id.
    pub fn remove(&mut self, id: DatasetId) -> Option<Entry<S>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.by_key.remove(&entry.key);
        self.free.push(id.index);
        Some(entry)
    }

    pub fn count(&self, id: DatasetId) -> usize {
        self.get(id).map_or(0, |e| e.count)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Shared state of every dataset open in `file`.
    pub fn datasets_in(&self, file: FileIdentity) -> Vec<S> {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .filter(|e| e.key.0 == file)
            .map(|e| e.shared.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: FileIdentity = FileIdentity {
        device: 3,
        inode: 9,
    };

    #[test]
    fn counts_follow_acquire_and_release() {
        let mut reg: Registry<&'static str> = Registry::new();
        let id = reg.insert((FILE, 800), "a", None);
        assert_eq!(reg.lookup(&(FILE, 800)), Some(id));
        assert_eq!(reg.acquire(id), Some(2));
        assert_eq!(reg.release(id), Some(1));
        assert_eq!(reg.release(id), Some(0));
        assert_eq!(reg.count(id), 0);
        assert!(reg.remove(id).is_some());
        assert!(reg.is_empty());
        assert_eq!(reg.lookup(&(FILE, 800)), None);
    }

    #[test]
    fn stale_ids_miss_reused_slots() {
        let mut reg: Registry<u32> = Registry::new();
        let old = reg.insert((FILE, 1), 1, None);
        reg.remove(old);
        let new = reg.insert((FILE, 2), 2, None);
        assert_ne!(old, new);
        assert!(reg.get(old).is_none());
        assert_eq!(reg.get(new).map(|e| e.shared), Some(2));
        assert_eq!(reg.acquire(old), None);
    }

    #[test]
    fn datasets_by_file() {
        let other = FileIdentity {
            device: 3,
            inode: 10,
        };
        let mut reg: Registry<u32> = Registry::new();
        reg.insert((FILE, 1), 1, None);
        reg.insert((other, 1), 2, None);
        reg.insert((FILE, 2), 3, None);
        let mut got = reg.datasets_in(FILE);
        got.sort();
        assert_eq!(got, vec![1, 3]);
        assert_eq!(reg.len(), 3);
    }
}
