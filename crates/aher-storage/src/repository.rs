//! Repository implementations for SQLite-backed persistence.
//!
//! [`TileRepository`] reads and writes source records; the
//! [`EmbeddingDocumentRepository`] owns `tile_embeddings`, where each tile has
//! at most one document and re-embedding overwrites it in place.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aher_core::error::AherError;
use aher_core::{EmbeddingVector, Point};

use crate::db::Database;

/// A source record: one tile of a resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    pub id: Uuid,
    pub resource_instance_id: Uuid,
    pub nodegroup_id: Option<Uuid>,
    /// Tile data keyed by node, as stored by the source system.
    pub data: serde_json::Value,
    /// Planar point geometry, if the tile is spatial.
    pub geometry: Option<Point>,
}

/// Rendered text and embedding for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEmbeddingDocument {
    pub id: Uuid,
    pub tile_id: Uuid,
    pub document: String,
    pub embedding: EmbeddingVector,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored document together with the geometry of its tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedDocument {
    pub document: TileEmbeddingDocument,
    pub geometry: Option<Point>,
}

/// Whether an upsert inserted a new document or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(Uuid),
    Updated(Uuid),
}

impl UpsertOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}

/// Repository for source records.
pub struct TileRepository {
    db: Arc<Database>,
}

impl TileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a tile.
    pub fn save(&self, tile: &TileRecord) -> Result<(), AherError> {
        let data = serde_json::to_string(&tile.data)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tiles (tileid, resourceinstanceid, nodegroupid, data, geom_x, geom_y)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(tileid) DO UPDATE SET
                    resourceinstanceid = excluded.resourceinstanceid,
                    nodegroupid = excluded.nodegroupid,
                    data = excluded.data,
                    geom_x = excluded.geom_x,
                    geom_y = excluded.geom_y",
                rusqlite::params![
                    tile.id.to_string(),
                    tile.resource_instance_id.to_string(),
                    tile.nodegroup_id.map(|id| id.to_string()),
                    data,
                    tile.geometry.map(|p| p.x),
                    tile.geometry.map(|p| p.y),
                ],
            )
            .map_err(|e| AherError::Storage(format!("Failed to save tile: {}", e)))?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<TileRecord>, AherError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT tileid, resourceinstanceid, nodegroupid, data, geom_x, geom_y
                     FROM tiles WHERE tileid = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(read_tile_row(row)),
                )
                .optional()
                .map_err(|e| AherError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Tiles to index, ordered by id.
    ///
    /// Tiles of any resource instance in `excluded` are skipped. When
    /// `resource` is set, only that resource instance's tiles are returned.
    pub fn list_for_indexing(
        &self,
        excluded: &[String],
        resource: Option<Uuid>,
    ) -> Result<Vec<TileRecord>, AherError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT tileid, resourceinstanceid, nodegroupid, data, geom_x, geom_y
                     FROM tiles
                     WHERE ?1 IS NULL OR resourceinstanceid = ?1
                     ORDER BY tileid",
                )
                .map_err(|e| AherError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![resource.map(|id| id.to_string())],
                    |row| Ok(read_tile_row(row)),
                )
                .map_err(|e| AherError::Storage(e.to_string()))?;

            let mut tiles = Vec::new();
            for row in rows {
                let tile = row.map_err(|e| AherError::Storage(e.to_string()))??;
                let resource_id = tile.resource_instance_id.to_string();
                if excluded.iter().any(|ex| ex.eq_ignore_ascii_case(&resource_id)) {
                    continue;
                }
                tiles.push(tile);
            }
            Ok(tiles)
        })
    }

    pub fn count(&self) -> Result<u64, AherError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))
                .map_err(|e| AherError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Repository for tile embedding documents.
pub struct EmbeddingDocumentRepository {
    db: Arc<Database>,
}

impl EmbeddingDocumentRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Write the document for `tile_id`, creating it or overwriting text and
    /// embedding in place. Never produces a second row for the same tile.
    pub fn upsert(
        &self,
        tile_id: Uuid,
        document: &str,
        embedding: &[f32],
    ) -> Result<UpsertOutcome, AherError> {
        let now = Utc::now().timestamp();
        let blob = encode_embedding(embedding);
        self.db.with_transaction(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT tileembeddingid FROM tile_embeddings WHERE tileid = ?1",
                    rusqlite::params![tile_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AherError::Storage(e.to_string()))?;

            match existing {
                Some(id) => {
                    conn.execute(
                        "UPDATE tile_embeddings
                         SET document = ?1, embedding = ?2, dimension = ?3, updated_at = ?4
                         WHERE tileembeddingid = ?5",
                        rusqlite::params![document, blob, embedding.len() as i64, now, id],
                    )
                    .map_err(|e| {
                        AherError::Storage(format!("Failed to update embedding: {}", e))
                    })?;
                    Ok(UpsertOutcome::Updated(parse_uuid(&id)?))
                }
                None => {
                    let id = Uuid::new_v4();
                    conn.execute(
                        "INSERT INTO tile_embeddings
                         (tileembeddingid, tileid, document, embedding, dimension, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        rusqlite::params![
                            id.to_string(),
                            tile_id.to_string(),
                            document,
                            blob,
                            embedding.len() as i64,
                            now,
                        ],
                    )
                    .map_err(|e| {
                        AherError::Storage(format!("Failed to insert embedding: {}", e))
                    })?;
                    Ok(UpsertOutcome::Created(id))
                }
            }
        })
    }

    pub fn find_by_tile(&self, tile_id: Uuid) -> Result<Option<TileEmbeddingDocument>, AherError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT tileembeddingid, tileid, document, embedding, created_at, updated_at
                     FROM tile_embeddings WHERE tileid = ?1",
                    rusqlite::params![tile_id.to_string()],
                    |row| Ok(read_document_row(row)),
                )
                .optional()
                .map_err(|e| AherError::Storage(e.to_string()))?;
            row.transpose()
        })
    }

    /// Every document joined with its tile's geometry.
    pub fn load_located(&self) -> Result<Vec<LocatedDocument>, AherError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT e.tileembeddingid, e.tileid, e.document, e.embedding,
                            e.created_at, e.updated_at, t.geom_x, t.geom_y
                     FROM tile_embeddings e
                     LEFT JOIN tiles t ON t.tileid = e.tileid
                     ORDER BY e.created_at, e.tileembeddingid",
                )
                .map_err(|e| AherError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let geom_x: Option<f64> = row.get(6)?;
                    let geom_y: Option<f64> = row.get(7)?;
                    let geometry = geom_x.zip(geom_y).map(|(x, y)| Point::new(x, y));
                    Ok(read_document_row(row).map(|document| LocatedDocument {
                        document,
                        geometry,
                    }))
                })
                .map_err(|e| AherError::Storage(e.to_string()))?;

            let mut docs = Vec::new();
            for row in rows {
                docs.push(row.map_err(|e| AherError::Storage(e.to_string()))??);
            }
            Ok(docs)
        })
    }

    /// Delete every document. Returns the number removed.
    pub fn truncate(&self) -> Result<usize, AherError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM tile_embeddings", [])
                .map_err(|e| AherError::Storage(format!("Failed to truncate embeddings: {}", e)))
        })
    }

    pub fn count(&self) -> Result<u64, AherError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM tile_embeddings", [], |row| row.get(0))
                .map_err(|e| AherError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }
}

/// Little-endian f32 bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<EmbeddingVector, AherError> {
    if bytes.len() % 4 != 0 {
        return Err(AherError::Storage(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_uuid(s: &str) -> Result<Uuid, AherError> {
    Uuid::parse_str(s).map_err(|e| AherError::Storage(format!("Invalid UUID '{}': {}", s, e)))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn read_tile_row(row: &rusqlite::Row<'_>) -> Result<TileRecord, AherError> {
    let get_err = |e: rusqlite::Error| AherError::Storage(e.to_string());
    let id: String = row.get(0).map_err(get_err)?;
    let resource: String = row.get(1).map_err(get_err)?;
    let nodegroup: Option<String> = row.get(2).map_err(get_err)?;
    let data: String = row.get(3).map_err(get_err)?;
    let geom_x: Option<f64> = row.get(4).map_err(get_err)?;
    let geom_y: Option<f64> = row.get(5).map_err(get_err)?;

    Ok(TileRecord {
        id: parse_uuid(&id)?,
        resource_instance_id: parse_uuid(&resource)?,
        nodegroup_id: nodegroup.as_deref().map(parse_uuid).transpose()?,
        data: serde_json::from_str(&data)?,
        geometry: geom_x.zip(geom_y).map(|(x, y)| Point::new(x, y)),
    })
}

fn read_document_row(row: &rusqlite::Row<'_>) -> Result<TileEmbeddingDocument, AherError> {
    let get_err = |e: rusqlite::Error| AherError::Storage(e.to_string());
    let id: String = row.get(0).map_err(get_err)?;
    let tile_id: String = row.get(1).map_err(get_err)?;
    let document: String = row.get(2).map_err(get_err)?;
    let blob: Vec<u8> = row.get(3).map_err(get_err)?;
    let created_at: i64 = row.get(4).map_err(get_err)?;
    let updated_at: i64 = row.get(5).map_err(get_err)?;

    Ok(TileEmbeddingDocument {
        id: parse_uuid(&id)?,
        tile_id: parse_uuid(&tile_id)?,
        document,
        embedding: decode_embedding(&blob)?,
        created_at: timestamp(created_at),
        updated_at: timestamp(updated_at),
    })
}
