//! Similarity store: persisted tile embedding documents served from an
//! in-memory HNSW index.
//!
//! The store owns the write path for embeddings (so the index and the
//! `tile_embeddings` table never diverge) and answers nearest-neighbour
//! queries, optionally scoped by a [`SpatialPredicate`] evaluated against each
//! document's tile geometry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use aher_core::error::AherError;
use aher_core::{Point, SpatialPredicate};
use aher_storage::{Database, EmbeddingDocumentRepository, TileRepository, UpsertOutcome};

use crate::index::{HnswIndex, HnswParams};

/// A document returned by [`SimilarityStore::find_similar`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarDocument {
    pub document_id: Uuid,
    pub tile_id: Uuid,
    pub document: String,
    /// Cosine distance to the query; lower is closer.
    pub distance: f32,
}

#[derive(Debug, Clone)]
struct Entry {
    document_id: Uuid,
    document: String,
    geometry: Option<Point>,
}

#[derive(Debug)]
struct State {
    index: HnswIndex,
    /// Keyed by tile id, the same key the index uses.
    entries: HashMap<Uuid, Entry>,
}

/// Vector store over `tile_embeddings`.
pub struct SimilarityStore {
    documents: EmbeddingDocumentRepository,
    tiles: TileRepository,
    state: RwLock<State>,
}

impl SimilarityStore {
    /// Load every persisted document into a fresh index.
    ///
    /// Documents whose stored dimension differs from `dimension` are skipped
    /// with a warning; they need re-indexing with the current model.
    pub fn open(db: Arc<Database>, dimension: usize, params: HnswParams) -> Result<Self, AherError> {
        let documents = EmbeddingDocumentRepository::new(db.clone());
        let tiles = TileRepository::new(db);

        let mut index = HnswIndex::new(dimension, params);
        let mut entries = HashMap::new();
        let mut skipped = 0usize;
        for located in documents.load_located()? {
            let doc = located.document;
            if doc.embedding.len() != dimension {
                skipped += 1;
                continue;
            }
            index.insert(doc.tile_id, &doc.embedding)?;
            entries.insert(
                doc.tile_id,
                Entry {
                    document_id: doc.id,
                    document: doc.document,
                    geometry: located.geometry,
                },
            );
        }
        if skipped > 0 {
            warn!(
                skipped,
                dimension, "Skipped stored embeddings with a different dimension"
            );
        }
        info!(documents = entries.len(), dimension, "Similarity store loaded");

        Ok(Self {
            documents,
            tiles,
            state: RwLock::new(State { index, entries }),
        })
    }

    pub fn dimension(&self) -> usize {
        self.read_state().map(|s| s.index.dimension()).unwrap_or(0)
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.read_state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, AherError> {
        self.state
            .read()
            .map_err(|e| AherError::Search(format!("Lock poisoned: {}", e)))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, AherError> {
        self.state
            .write()
            .map_err(|e| AherError::Search(format!("Lock poisoned: {}", e)))
    }

    /// Store `document` and `embedding` for `tile_id`, overwriting any
    /// previous document for that tile.
    pub fn upsert(
        &self,
        tile_id: Uuid,
        document: &str,
        embedding: &[f32],
    ) -> Result<UpsertOutcome, AherError> {
        let mut state = self.write_state()?;
        if embedding.len() != state.index.dimension() {
            return Err(AherError::DimensionMismatch {
                expected: state.index.dimension(),
                actual: embedding.len(),
            });
        }

        let geometry = self.tiles.find_by_id(tile_id)?.and_then(|t| t.geometry);
        let outcome = self.documents.upsert(tile_id, document, embedding)?;
        state.index.insert(tile_id, embedding)?;
        state.entries.insert(
            tile_id,
            Entry {
                document_id: outcome.id(),
                document: document.to_string(),
                geometry,
            },
        );
        Ok(outcome)
    }

    /// Remove every document from the table and the index.
    pub fn truncate(&self) -> Result<usize, AherError> {
        let mut state = self.write_state()?;
        let removed = self.documents.truncate()?;
        let dimension = state.index.dimension();
        let params = state.index.params();
        state.index = HnswIndex::new(dimension, params);
        state.entries.clear();
        info!(removed, "Similarity store truncated");
        Ok(removed)
    }

    /// The `k` documents nearest to `query`, nearest first.
    ///
    /// With a `filter`, only documents whose tile geometry satisfies the
    /// predicate are considered; documents without geometry never match.
    /// With `max_distance`, documents further than that are dropped.
    pub fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SpatialPredicate>,
        max_distance: Option<f32>,
    ) -> Result<Vec<SimilarDocument>, AherError> {
        let state = self.read_state()?;
        let accept = |tile_id: &Uuid| match filter {
            None => true,
            Some(predicate) => state
                .entries
                .get(tile_id)
                .and_then(|e| e.geometry)
                .is_some_and(|point| predicate.matches(&point)),
        };

        let neighbors = state.index.search_filtered(query, k, accept)?;
        let results = neighbors
            .into_iter()
            .filter(|n| max_distance.map_or(true, |max| n.distance <= max))
            .filter_map(|n| {
                state.entries.get(&n.id).map(|entry| SimilarDocument {
                    document_id: entry.document_id,
                    tile_id: n.id,
                    document: entry.document.clone(),
                    distance: n.distance,
                })
            })
            .collect();
        Ok(results)
    }
}

impl std::fmt::Debug for SimilarityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityStore")
            .field("documents", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aher_storage::TileRecord;
    use serde_json::json;

    fn setup(dimension: usize) -> (Arc<Database>, SimilarityStore) {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SimilarityStore::open(db.clone(), dimension, HnswParams::default()).unwrap();
        (db, store)
    }

    fn add_tile(db: &Arc<Database>, geometry: Option<Point>) -> Uuid {
        let tile = TileRecord {
            id: Uuid::new_v4(),
            resource_instance_id: Uuid::new_v4(),
            nodegroup_id: None,
            data: json!({}),
            geometry,
        };
        TileRepository::new(db.clone()).save(&tile).unwrap();
        tile.id
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (db, store) = setup(2);
        let tile = add_tile(&db, None);

        let first = store.upsert(tile, "old text", &[1.0, 0.0]).unwrap();
        let second = store.upsert(tile, "new text", &[0.0, 1.0]).unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(store.len(), 1);
        assert_eq!(
            EmbeddingDocumentRepository::new(db).count().unwrap(),
            1
        );

        let hits = store.find_similar(&[0.0, 1.0], 5, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "new text");
        assert_eq!(hits[0].document_id, first.id());
        assert!(hits[0].distance < 1e-6);
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let (db, store) = setup(2);
        let near = add_tile(&db, None);
        let mid = add_tile(&db, None);
        let far = add_tile(&db, None);
        store.upsert(far, "far", &[-1.0, 0.0]).unwrap();
        store.upsert(near, "near", &[1.0, 0.1]).unwrap();
        store.upsert(mid, "mid", &[0.0, 1.0]).unwrap();

        let hits = store.find_similar(&[1.0, 0.0], 3, None, None).unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.document.as_str()).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
    }

    #[test]
    fn test_spatial_filter_restricts_results() {
        let (db, store) = setup(2);
        let inside = add_tile(&db, Some(Point::new(100.0, 100.0)));
        let outside = add_tile(&db, Some(Point::new(50_000.0, 0.0)));
        let nowhere = add_tile(&db, None);
        store.upsert(inside, "inside", &[0.0, 1.0]).unwrap();
        store.upsert(outside, "outside", &[1.0, 0.0]).unwrap();
        store.upsert(nowhere, "nowhere", &[1.0, 0.0]).unwrap();

        let predicate = SpatialPredicate::new(vec![Point::new(0.0, 0.0)], 2000.0).unwrap();
        let hits = store
            .find_similar(&[1.0, 0.0], 5, Some(&predicate), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tile_id, inside);

        let unscoped = store.find_similar(&[1.0, 0.0], 5, None, None).unwrap();
        assert_eq!(unscoped.len(), 3);
    }

    #[test]
    fn test_max_distance_threshold() {
        let (db, store) = setup(2);
        let a = add_tile(&db, None);
        let b = add_tile(&db, None);
        store.upsert(a, "same", &[1.0, 0.0]).unwrap();
        store.upsert(b, "opposite", &[-1.0, 0.0]).unwrap();

        let hits = store
            .find_similar(&[1.0, 0.0], 5, None, Some(0.3))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "same");
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let (db, store) = setup(768);
        let tile = add_tile(&db, None);
        assert!(matches!(
            store.upsert(tile, "text", &vec![0.1; 1536]),
            Err(AherError::DimensionMismatch { expected: 768, actual: 1536 })
        ));
        assert!(matches!(
            store.find_similar(&vec![0.1; 1536], 5, None, None),
            Err(AherError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_reopen_loads_persisted_documents() {
        let (db, store) = setup(2);
        let tile = add_tile(&db, Some(Point::new(1.0, 1.0)));
        store.upsert(tile, "persisted", &[1.0, 0.0]).unwrap();
        drop(store);

        let reopened = SimilarityStore::open(db.clone(), 2, HnswParams::default()).unwrap();
        assert_eq!(reopened.len(), 1);

        let other_dimension = SimilarityStore::open(db, 3, HnswParams::default()).unwrap();
        assert!(other_dimension.is_empty());
    }

    #[test]
    fn test_truncate() {
        let (db, store) = setup(2);
        let tile = add_tile(&db, None);
        store.upsert(tile, "text", &[1.0, 0.0]).unwrap();

        assert_eq!(store.truncate().unwrap(), 1);
        assert!(store.is_empty());
        assert!(store.find_similar(&[1.0, 0.0], 5, None, None).unwrap().is_empty());
    }
}
