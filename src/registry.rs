use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::error::{AnnError, Result};
use crate::index::Index;

/// Opaque identifier of a live index.
///
/// A handle names a slot plus the generation the slot had when the index was
/// stored. Slots are recycled after `remove`, generations are not, so a
/// stale handle never resolves to a newer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexHandle {
    slot: u32,
    generation: u32,
}

impl IndexHandle {
    /// Pack into a single integer for foreign callers.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.slot)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl std::fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    index: Arc<Index>,
}

#[derive(Debug, Default)]
struct Table {
    live: HashMap<u32, Entry>,
    /// Next generation per slot ever issued.
    generations: Vec<u32>,
    free_slots: Vec<u32>,
}

/// Thread-safe table of built indexes.
///
/// Lookups hand out `Arc<Index>` clones, so an index removed while a search
/// is still running stays alive until that search drops it.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    table: RwLock<Table>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `index` and issue a handle for it.
    pub fn insert(&self, index: Index) -> Result<IndexHandle> {
        let mut table = self.table.write();
        let slot = match table.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot = u32::try_from(table.generations.len()).map_err(|_| {
                    AnnError::AllocationFailure("index registry is full".into())
                })?;
                table.generations.push(0);
                slot
            }
        };
        let generation = table.generations[slot as usize];
        table.live.insert(
            slot,
            Entry {
                generation,
                index: Arc::new(index),
            },
        );
        let handle = IndexHandle { slot, generation };
        tracing::debug!(%handle, live = table.live.len(), "index registered");
        Ok(handle)
    }

    /// Shared reference to the index behind `handle`.
    pub fn get(&self, handle: IndexHandle) -> Result<Arc<Index>> {
        let table = self.table.read();
        match table.live.get(&handle.slot) {
            Some(entry) if entry.generation == handle.generation => Ok(Arc::clone(&entry.index)),
            _ => Err(AnnError::InvalidHandle(handle)),
        }
    }

    /// Release `handle`. The slot may be reused with a new generation.
    pub fn remove(&self, handle: IndexHandle) -> Result<()> {
        let mut table = self.table.write();
        match table.live.get(&handle.slot) {
            Some(entry) if entry.generation == handle.generation => {}
            _ => return Err(AnnError::InvalidHandle(handle)),
        }
        table.live.remove(&handle.slot);
        let next = &mut table.generations[handle.slot as usize];
        *next = next.wrapping_add(1);
        table.free_slots.push(handle.slot);
        tracing::debug!(%handle, live = table.live.len(), "index released");
        Ok(())
    }

    /// Number of live indexes.
    pub fn len(&self) -> usize {
        self.table.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::params::{Algorithm, IndexParameters};

    fn linear_index() -> Index {
        let ds = Dataset::from_rows(&[vec![0.0f32, 1.0], vec![2.0, 3.0]]).unwrap();
        let params = IndexParameters::builder()
            .algorithm(Algorithm::Linear)
            .build()
            .unwrap();
        Index::build(&ds, &params).unwrap()
    }

    #[test]
    fn test_insert_get_remove() {
        let reg = IndexRegistry::new();
        let h = reg.insert(linear_index()).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(h).unwrap().size(), 2);
        reg.remove(h).unwrap();
        assert!(reg.is_empty());
        assert!(matches!(reg.get(h).unwrap_err(), AnnError::InvalidHandle(x) if x == h));
    }

    #[test]
    fn test_double_free_is_invalid() {
        let reg = IndexRegistry::new();
        let h = reg.insert(linear_index()).unwrap();
        reg.remove(h).unwrap();
        assert!(matches!(reg.remove(h).unwrap_err(), AnnError::InvalidHandle(_)));
    }

    #[test]
    fn test_recycled_slot_rejects_stale_handle() {
        let reg = IndexRegistry::new();
        let old = reg.insert(linear_index()).unwrap();
        reg.remove(old).unwrap();
        let new = reg.insert(linear_index()).unwrap();
        assert_ne!(old, new);
        assert!(reg.get(old).is_err());
        assert!(reg.get(new).is_ok());
    }

    #[test]
    fn test_unknown_handle() {
        let reg = IndexRegistry::new();
        let bogus = IndexHandle::from_raw(42);
        assert!(matches!(reg.get(bogus).unwrap_err(), AnnError::InvalidHandle(_)));
    }

    #[test]
    fn test_removed_index_outlives_in_flight_reference() {
        let reg = IndexRegistry::new();
        let h = reg.insert(linear_index()).unwrap();
        let held = reg.get(h).unwrap();
        reg.remove(h).unwrap();
        assert_eq!(held.knn_search(&[0.0, 1.0], 1, 1).unwrap()[0].index, 0);
    }

    #[test]
    fn test_raw_round_trip() {
        let h = IndexHandle {
            slot: 7,
            generation: 3,
        };
        assert_eq!(IndexHandle::from_raw(h.to_raw()), h);
    }
}
