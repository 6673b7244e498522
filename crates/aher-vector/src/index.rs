//! Approximate nearest-neighbour index over cosine distance, backed by
//! `hnsw_rs`.
//!
//! The `hnsw_rs` graph is append-only and addressed by dense `usize` slots.
//! Each slot maps back to a tile [`Uuid`]. Re-inserting or removing an id
//! marks its old slot stale and search filters stale slots out. The graph is
//! rebuilt from live slots once stale slots outnumber live ones or the
//! graph's capacity is reached.
//!
//! Recall is approximate. What callers can rely on is that results are
//! sorted by ascending distance as computed here.

use std::collections::HashMap;

use hnsw_rs::prelude::{DistCosine, Hnsw};
use uuid::Uuid;

use aher_core::config::StoreConfig;
use aher_core::error::AherError;

/// Graph capacity after a rebuild never drops below this.
const MIN_CAPACITY: usize = 1024;

/// `hnsw_rs` supports at most 16 layers.
const MAX_LAYER: usize = 16;

/// Graph construction and search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HnswParams {
    /// Maximum links per node.
    pub m: usize,
    /// Candidate list size while inserting.
    pub ef_construction: usize,
    /// Minimum candidate list size while searching.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 64,
            ef_search: 40,
        }
    }
}

impl HnswParams {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            m: config.hnsw_m.max(2),
            ef_construction: config.hnsw_ef_construction.max(1),
            ef_search: config.hnsw_ef_search.max(1),
        }
    }
}

/// A search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    /// Cosine distance, `1 - cos(query, vector)`, in `[0, 2]`.
    pub distance: f32,
}

struct Slot {
    id: Uuid,
    vector: Vec<f32>,
    live: bool,
}

/// Approximate nearest-neighbour index keyed by [`Uuid`].
pub struct HnswIndex {
    params: HnswParams,
    dimension: usize,
    graph: Hnsw<'static, f32, DistCosine>,
    capacity: usize,
    slots: Vec<Slot>,
    ids: HashMap<Uuid, usize>,
}

fn build_graph(params: HnswParams, capacity: usize) -> Hnsw<'static, f32, DistCosine> {
    let max_layer = MAX_LAYER.min((capacity as f32).ln().trunc() as usize).max(1);
    Hnsw::<f32, DistCosine>::new(
        params.m,
        capacity,
        max_layer,
        params.ef_construction,
        DistCosine {},
    )
}

impl HnswIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        Self {
            params,
            dimension,
            graph: build_graph(params, MIN_CAPACITY),
            capacity: MIN_CAPACITY,
            slots: Vec::new(),
            ids: HashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains_key(id)
    }

    /// Graph slots left behind by replaced or removed entries.
    pub fn stale_slots(&self) -> usize {
        self.slots.len() - self.ids.len()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), AherError> {
        if actual != self.dimension {
            return Err(AherError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Insert `vector` under `id`, replacing any previous vector for `id`.
    pub fn insert(&mut self, id: Uuid, vector: &[f32]) -> Result<(), AherError> {
        self.check_dimension(vector.len())?;
        self.remove(&id);
        if self.slots.len() >= self.capacity {
            self.rebuild();
        }

        let slot = self.slots.len();
        self.graph.insert((vector, slot));
        self.slots.push(Slot {
            id,
            vector: vector.to_vec(),
            live: true,
        });
        self.ids.insert(id, slot);
        Ok(())
    }

    /// Drop `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        let Some(slot) = self.ids.remove(id) else {
            return false;
        };
        self.slots[slot].live = false;
        if self.stale_slots() > self.len() {
            self.rebuild();
        }
        true
    }

    /// Replace the graph with one holding only live slots.
    fn rebuild(&mut self) {
        let live: Vec<Slot> = self.slots.drain(..).filter(|s| s.live).collect();
        self.capacity = (live.len() * 2).max(MIN_CAPACITY);
        self.graph = build_graph(self.params, self.capacity);
        self.ids.clear();
        for (slot, entry) in live.iter().enumerate() {
            self.graph.insert((entry.vector.as_slice(), slot));
            self.ids.insert(entry.id, slot);
        }
        self.slots = live;
        tracing::debug!(
            live = self.slots.len(),
            capacity = self.capacity,
            "HNSW graph rebuilt"
        );
    }

    /// The `k` nearest live entries, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, AherError> {
        self.search_filtered(query, k, |_| true)
    }

    /// The `k` nearest live entries accepted by `accept`, nearest first.
    ///
    /// The candidate list starts at `max(ef_search, k)` and is widened while
    /// too few accepted entries are found.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, accept: F) -> Result<Vec<Neighbor>, AherError>
    where
        F: Fn(&Uuid) -> bool,
    {
        self.check_dimension(query.len())?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let filter = |slot: &usize| {
            self.slots
                .get(*slot)
                .is_some_and(|s| s.live && accept(&s.id))
        };

        let total = self.slots.len();
        let mut ef = self.params.ef_search.max(k);
        loop {
            let mut hits: Vec<Neighbor> = self
                .graph
                .search_filter(query, k, ef, Some(&filter))
                .into_iter()
                .filter_map(|n| {
                    let slot = self.slots.get(n.d_id)?;
                    (slot.live && accept(&slot.id)).then_some(Neighbor {
                        id: slot.id,
                        distance: n.distance,
                    })
                })
                .collect();
            if hits.len() >= k || ef >= total {
                hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                hits.truncate(k);
                return Ok(hits);
            }
            ef = (ef * 2).min(total);
        }
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dimension", &self.dimension)
            .field("params", &self.params)
            .field("live", &self.len())
            .field("stale", &self.stale_slots())
            .field("capacity", &self.capacity)
            .finish()
    }
}
