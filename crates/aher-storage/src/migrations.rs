//! Database schema migrations.
//!
//! Version 1 creates the source record table (`tiles`) and the
//! `tile_embeddings` table the indexing job writes and queries read.

use rusqlite::Connection;
use tracing::info;

use aher_core::error::AherError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), AherError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| AherError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| AherError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: tiles_and_embeddings");
    }

    Ok(())
}

/// Version 1: tiles and tile embeddings.
fn apply_v1(conn: &Connection) -> Result<(), AherError> {
    conn.execute_batch(
        "
        -- Source records. Geometry is a single planar (EPSG:3857) point.
        CREATE TABLE IF NOT EXISTS tiles (
            tileid              TEXT PRIMARY KEY NOT NULL,
            resourceinstanceid  TEXT NOT NULL,
            nodegroupid         TEXT,
            data                TEXT NOT NULL DEFAULT '{}',
            geom_x              REAL,
            geom_y              REAL,
            created_at          INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            CHECK ((geom_x IS NULL) = (geom_y IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_tiles_resource
            ON tiles (resourceinstanceid);

        -- One embedding document per tile; re-embedding overwrites in place.
        CREATE TABLE IF NOT EXISTS tile_embeddings (
            tileembeddingid TEXT PRIMARY KEY NOT NULL,
            tileid          TEXT NOT NULL UNIQUE,
            document        TEXT NOT NULL,
            embedding       BLOB NOT NULL,
            dimension       INTEGER NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            FOREIGN KEY (tileid) REFERENCES tiles(tileid) ON DELETE CASCADE
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'tiles_and_embeddings');
        ",
    )
    .map_err(|e| AherError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
