//! AHER storage crate - SQLite persistence for source records and their
//! embedding documents.
//!
//! Provides a WAL-mode SQLite database with migrations and the repositories
//! used by the indexing job (writes) and the similarity store (reads).

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{
    decode_embedding, encode_embedding, EmbeddingDocumentRepository, LocatedDocument,
    TileEmbeddingDocument, TileRecord, TileRepository, UpsertOutcome,
};
