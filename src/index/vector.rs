//! Flat vector index with logical deletion.
//!
//! Exact nearest-neighbor scan over unit-normalized vectors under cosine
//! similarity. At single-project scale a flat scan beats approximate
//! structures on recall and determinism: results are ordered by descending
//! similarity with ties broken by insertion order, and that ordering is
//! stable across persist/load cycles.
//!
//! `remove` is logical: slots are tombstoned and the table is compacted once
//! dead slots outnumber live ones. Removed ids never appear in search
//! results. Vectors are never mutated in place; changing content means
//! removal plus insertion of a new chunk id.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Opaque identifier of one indexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    id: ChunkId,
    vector: Vec<f32>,
    deleted: bool,
}

/// Flat cosine-similarity index.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    slots: Vec<Slot>,
    positions: FxHashMap<ChunkId, usize>,
    dead: usize,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            slots: Vec::new(),
            positions: FxHashMap::default(),
            dead: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live (searchable) vectors.
    pub fn len(&self) -> usize {
        self.slots.len() - self.dead
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a vector under a fresh chunk id. The vector is normalized on
    /// the way in; a length mismatch against the index dimension is fatal.
    pub fn insert(&mut self, id: ChunkId, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        debug_assert!(
            !self.positions.contains_key(&id),
            "chunk id inserted twice"
        );

        let mut vector = vector;
        normalize(&mut vector);
        self.positions.insert(id, self.slots.len());
        self.slots.push(Slot {
            id,
            vector,
            deleted: false,
        });
        Ok(())
    }

    /// Tombstone the given ids. Returns how many were actually present.
    pub fn remove(&mut self, ids: &[ChunkId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(position) = self.positions.remove(id) {
                let slot = &mut self.slots[position];
                if !slot.deleted {
                    slot.deleted = true;
                    slot.vector = Vec::new();
                    self.dead += 1;
                    removed += 1;
                }
            }
        }
        if self.dead > self.slots.len() / 2 {
            self.compact();
        }
        removed
    }

    /// Exact k-NN scan. Candidates come back ordered by descending cosine
    /// similarity; equal scores keep insertion order (the scan is in
    /// insertion order and the sort is stable).
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(ChunkId, f32)> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let query_norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(ChunkId, f32)> = self
            .slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| {
                let dot: f32 = slot.vector.iter().zip(query).map(|(a, b)| a * b).sum();
                (slot.id, dot / query_norm)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Stored (normalized) vector for a live chunk id.
    pub fn get(&self, id: ChunkId) -> Option<&[f32]> {
        let position = *self.positions.get(&id)?;
        let slot = &self.slots[position];
        (!slot.deleted).then_some(slot.vector.as_slice())
    }

    /// Live entries in insertion order, for persistence.
    pub fn live_entries(&self) -> Vec<(ChunkId, Vec<f32>)> {
        self.slots
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| (slot.id, slot.vector.clone()))
            .collect()
    }

    /// Rebuild an index from previously persisted entries. Entry order is
    /// preserved so search tie-breaking round-trips.
    pub fn from_entries(dimension: usize, entries: Vec<(ChunkId, Vec<f32>)>) -> Result<Self> {
        let mut index = Self::new(dimension);
        for (id, vector) in entries {
            index.insert(id, vector)?;
        }
        Ok(index)
    }

    /// Drop tombstoned slots and rebuild the position map.
    fn compact(&mut self) {
        self.slots.retain(|slot| !slot.deleted);
        self.positions = self
            .slots
            .iter()
            .enumerate()
            .map(|(position, slot)| (slot.id, position))
            .collect();
        self.dead = 0;
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
