//! Tile indexing job.
//!
//! Walks source records, renders each tile's data to compact display text,
//! embeds it and upserts it into the similarity store keyed on tile id.
//! Running the job twice leaves one document per tile.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use aher_core::config::IndexingConfig;
use aher_core::error::AherError;
use aher_storage::{Database, TileRecord, TileRepository};

use crate::embedding::EmbeddingProvider;
use crate::search::SimilarityStore;

/// Internal bookkeeping keys never rendered into documents.
const IGNORE_KEYS: &[&str] = &[
    "valueid",
    "concept_id",
    "language_id",
    "valuetype_id",
    "instance_details",
    "direction",
    "Geospatial Coordinates",
    "inverseOntologyProperty",
    "ontologyProperty",
    "resourceId",
    "resourceXresourceId",
    "graph_id",
    "legacyid",
    "map_popup",
    "concept_details",
    "@display_value",
];

/// Placeholder strings treated as empty.
const EMPTY_MARKERS: &[&str] = &["null", "Undefined"];

/// Options for a single indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Delete every existing document first.
    pub truncate: bool,
    /// Only index tiles of this resource instance.
    pub resource: Option<Uuid>,
}

/// What an indexing run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub truncated: usize,
    pub created: usize,
    pub updated: usize,
    /// Tiles whose data rendered to nothing.
    pub skipped: usize,
}

impl IndexReport {
    pub fn indexed(&self) -> usize {
        self.created + self.updated
    }
}

/// Recursively drop empty values, placeholder strings and internal keys.
pub fn compact_tile_data(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let compacted: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !is_ignored_key(key))
                .map(|(key, v)| (key.clone(), compact_tile_data(v)))
                .filter(|(_, v)| !is_empty(v))
                .collect();
            Value::Object(compacted)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(compact_tile_data)
                .filter(|v| !is_empty(v))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_ignored_key(key: &str) -> bool {
    IGNORE_KEYS.contains(&key) || key.contains("Metatype")
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || EMPTY_MARKERS.contains(&s.as_str()),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Compact JSON text for a tile, or `None` if nothing survives compaction.
pub fn render_tile_display(data: &Value) -> Option<String> {
    let compacted = compact_tile_data(data);
    if is_empty(&compacted) {
        return None;
    }
    Some(compacted.to_string())
}

/// Embeds tiles into a [`SimilarityStore`].
pub struct TileIndexer {
    tiles: TileRepository,
    store: Arc<SimilarityStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    excluded: Vec<String>,
    batch_size: usize,
}

impl TileIndexer {
    pub fn new(
        db: Arc<Database>,
        store: Arc<SimilarityStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &IndexingConfig,
    ) -> Self {
        Self {
            tiles: TileRepository::new(db),
            store,
            embedder,
            excluded: config.excluded_resource_instances.clone(),
            batch_size: config.batch_size.max(1),
        }
    }

    pub async fn run(&self, options: &IndexOptions) -> Result<IndexReport, AherError> {
        let mut report = IndexReport::default();

        if options.truncate {
            info!("Truncating existing tile embeddings");
            report.truncated = self.store.truncate()?;
        }
        if let Some(resource) = options.resource {
            info!(%resource, "Indexing tiles for one resource instance");
        }

        let tiles = self.tiles.list_for_indexing(&self.excluded, options.resource)?;
        let mut remaining = tiles.len();
        info!(tiles = remaining, "Indexing tiles");

        let rendered: Vec<(TileRecord, String)> = tiles
            .into_iter()
            .filter_map(|tile| match render_tile_display(&tile.data) {
                Some(text) => Some((tile, text)),
                None => {
                    debug!(tile = %tile.id, "Tile has no displayable data");
                    report.skipped += 1;
                    None
                }
            })
            .collect();
        remaining -= report.skipped;

        for batch in rendered.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            for ((tile, text), embedding) in batch.iter().zip(embeddings) {
                let outcome = self.store.upsert(tile.id, text, &embedding)?;
                remaining -= 1;
                if outcome.is_created() {
                    report.created += 1;
                    debug!(tile = %tile.id, remaining, "Created embedding for tile");
                } else {
                    report.updated += 1;
                    debug!(tile = %tile.id, remaining, "Updated embedding for tile");
                }
            }
        }

        if report.skipped > 0 {
            warn!(skipped = report.skipped, "Some tiles had nothing to index");
        }
        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "Successfully created/updated tile embeddings"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::index::HnswParams;
    use aher_core::config::SYSTEM_SETTINGS_RESOURCE_ID;
    use aher_storage::EmbeddingDocumentRepository;
    use serde_json::json;

    struct Fixture {
        db: Arc<Database>,
        store: Arc<SimilarityStore>,
        indexer: TileIndexer,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let store =
            Arc::new(SimilarityStore::open(db.clone(), 16, HnswParams::default()).unwrap());
        let config = IndexingConfig {
            batch_size: 2,
            ..IndexingConfig::default()
        };
        let indexer = TileIndexer::new(
            db.clone(),
            store.clone(),
            Arc::new(MockEmbedding::new(16)),
            &config,
        );
        Fixture { db, store, indexer }
    }

    fn save_tile(db: &Arc<Database>, resource: Uuid, data: Value) -> Uuid {
        let tile = TileRecord {
            id: Uuid::new_v4(),
            resource_instance_id: resource,
            nodegroup_id: None,
            data,
            geometry: None,
        };
        TileRepository::new(db.clone()).save(&tile).unwrap();
        tile.id
    }

    #[test]
    fn test_compact_drops_empty_and_internal_values() {
        let data = json!({
            "Name": "Camden Lock",
            "valueid": "abc",
            "Monument Metatype": "x",
            "Period": "Undefined",
            "Notes": "",
            "Geospatial Coordinates": {"type": "Point"},
            "Designations": [null, "", {"@display_value": "hidden"}, "Grade II"],
            "Count": 0,
            "Nested": {"concept_id": "c1", "label": "null"}
        });
        assert_eq!(
            compact_tile_data(&data),
            json!({"Name": "Camden Lock", "Designations": ["Grade II"], "Count": 0})
        );
    }

    #[test]
    fn test_render_empty_tile_is_none() {
        assert!(render_tile_display(&json!({"valueid": "x", "Notes": ""})).is_none());
        assert_eq!(
            render_tile_display(&json!({"Name": "Kenwood House"})).unwrap(),
            r#"{"Name":"Kenwood House"}"#
        );
    }

    #[tokio::test]
    async fn test_run_indexes_and_skips_system_settings() {
        let f = fixture();
        let settings = Uuid::parse_str(SYSTEM_SETTINGS_RESOURCE_ID).unwrap();
        let resource = Uuid::new_v4();
        save_tile(&f.db, settings, json!({"Setting": "on"}));
        for name in ["Camden Lock", "Kenwood House", "Roundhouse"] {
            save_tile(&f.db, resource, json!({ "Name": name }));
        }
        save_tile(&f.db, resource, json!({ "Notes": "" }));

        let report = f.indexer.run(&IndexOptions::default()).await.unwrap();
        assert_eq!(
            report,
            IndexReport {
                truncated: 0,
                created: 3,
                updated: 0,
                skipped: 1
            }
        );
        assert_eq!(f.store.len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_updates_without_duplicates() {
        let f = fixture();
        let resource = Uuid::new_v4();
        let tile = save_tile(&f.db, resource, json!({"Name": "Camden Lock"}));

        f.indexer.run(&IndexOptions::default()).await.unwrap();
        let report = f.indexer.run(&IndexOptions::default()).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 1);

        let docs = EmbeddingDocumentRepository::new(f.db.clone());
        assert_eq!(docs.count().unwrap(), 1);
        let doc = docs.find_by_tile(tile).unwrap().unwrap();
        assert_eq!(doc.document, r#"{"Name":"Camden Lock"}"#);
    }

    #[tokio::test]
    async fn test_truncate_and_resource_filter() {
        let f = fixture();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        save_tile(&f.db, a, json!({"Name": "A1"}));
        save_tile(&f.db, b, json!({"Name": "B1"}));
        save_tile(&f.db, b, json!({"Name": "B2"}));
        f.indexer.run(&IndexOptions::default()).await.unwrap();

        let report = f
            .indexer
            .run(&IndexOptions {
                truncate: true,
                resource: Some(b),
            })
            .await
            .unwrap();
        assert_eq!(report.truncated, 3);
        assert_eq!(report.created, 2);
        assert_eq!(f.store.len(), 2);
    }
}
