//! In-memory vector storage in a structure-of-arrays layout.

use crate::error::{Result, VecSimError};
use crate::vector::VectorRecord;
use std::collections::HashMap;
use std::sync::Arc;

/// Column storage shared between the live store and its views.
#[derive(Debug, Clone, Default)]
struct Columns {
    /// Key -> slot
    slots: HashMap<Arc<str>, usize>,
    /// Slot -> key
    keys: Vec<Arc<str>>,
    /// `keys.len() * dimension` floats, slot-major
    data: Vec<f32>,
    /// Precomputed L2 norm per slot
    norms: Vec<f64>,
}

/// The set of vector records resident in one shard.
///
/// Mutations go through `Arc::make_mut`, so a [`StoreView`] taken earlier keeps
/// seeing the columns as they were when it was taken.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    columns: Arc<Columns>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            columns: Arc::new(Columns::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Bind `record` to `key`, overwriting any existing record in place.
    /// Returns `true` when a record was replaced.
    pub fn upsert(&mut self, key: &str, record: VectorRecord) -> Result<bool> {
        if record.dimension() != self.dimension {
            return Err(VecSimError::InvalidVectorSize {
                dimension: self.dimension,
                actual_bytes: record.dimension() * std::mem::size_of::<f32>(),
            });
        }

        let dim = self.dimension;
        let norm = record.norm();
        let cols = Arc::make_mut(&mut self.columns);

        if let Some(&slot) = cols.slots.get(key) {
            cols.data[slot * dim..(slot + 1) * dim].copy_from_slice(record.as_slice());
            cols.norms[slot] = norm;
            return Ok(true);
        }

        let key: Arc<str> = Arc::from(key);
        let slot = cols.keys.len();
        cols.keys.push(Arc::clone(&key));
        cols.data.extend_from_slice(record.as_slice());
        cols.norms.push(norm);
        cols.slots.insert(key, slot);
        Ok(false)
    }

    /// Release the record bound to `key`. The last slot moves into the hole.
    pub fn remove(&mut self, key: &str) -> bool {
        // Avoid a copy-on-write for keys we do not hold.
        if !self.columns.slots.contains_key(key) {
            return false;
        }

        let dim = self.dimension;
        let cols = Arc::make_mut(&mut self.columns);
        let slot = match cols.slots.remove(key) {
            Some(slot) => slot,
            None => return false,
        };
        let last = cols.keys.len() - 1;

        cols.keys.swap_remove(slot);
        cols.norms.swap_remove(slot);
        if slot != last {
            cols.data.copy_within(last * dim..(last + 1) * dim, slot * dim);
            let moved = Arc::clone(&cols.keys[slot]);
            cols.slots.insert(moved, slot);
        }
        cols.data.truncate(last * dim);
        true
    }

    /// Release every record. Returns how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.len();
        self.columns = Arc::new(Columns::default());
        released
    }

    pub fn contains(&self, key: &str) -> bool {
        self.columns.slots.contains_key(key)
    }

    /// Copy out the record bound to `key`.
    pub fn get(&self, key: &str) -> Option<VectorRecord> {
        let view = self.view();
        let slot = view.slot_of(key)?;
        VectorRecord::from_slice(view.vector(slot), self.dimension).ok()
    }

    pub fn len(&self) -> usize {
        self.columns.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.keys.is_empty()
    }

    /// List all keys, in slot order.
    pub fn list_keys(&self) -> Vec<String> {
        self.columns.keys.iter().map(|k| k.to_string()).collect()
    }

    /// A point-in-time view; O(1) to take.
    pub fn view(&self) -> StoreView {
        StoreView {
            dimension: self.dimension,
            columns: Arc::clone(&self.columns),
        }
    }
}

/// Immutable point-in-time view of a [`VectorStore`].
///
/// Safe to hand to another thread: later mutations of the store never touch
/// the columns a view holds.
#[derive(Debug, Clone)]
pub struct StoreView {
    dimension: usize,
    columns: Arc<Columns>,
}

impl StoreView {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.columns.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.keys.is_empty()
    }

    pub fn slot_of(&self, key: &str) -> Option<usize> {
        self.columns.slots.get(key).copied()
    }

    #[inline]
    pub fn key(&self, slot: usize) -> &str {
        &self.columns.keys[slot]
    }

    #[inline]
    pub fn vector(&self, slot: usize) -> &[f32] {
        &self.columns.data[slot * self.dimension..(slot + 1) * self.dimension]
    }

    #[inline]
    pub fn norm(&self, slot: usize) -> f64 {
        self.columns.norms[slot]
    }

    /// Iterate over all `(key, vector)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.columns
            .keys
            .iter()
            .zip(self.columns.data.chunks_exact(self.dimension))
            .map(|(k, v)| (k.as_ref(), v))
    }
}
