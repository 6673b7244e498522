//! AHER vector crate - embedding providers, HNSW index, similarity store and
//! the tile indexing job.
//!
//! Embeddings come from a configuration-selected [`EmbeddingBackend`]. The
//! [`SimilarityStore`] keeps persisted tile documents in an in-memory `hnsw_rs`
//! graph over cosine distance and answers spatially scoped queries.

pub mod embedding;
pub mod index;
pub mod indexer;
pub mod search;

pub use embedding::{
    AzureOpenAiEmbedding, EmbeddingBackend, EmbeddingProvider, MockEmbedding, OllamaEmbedding,
};
pub use index::{HnswIndex, HnswParams, Neighbor};
pub use indexer::{compact_tile_data, render_tile_display, IndexOptions, IndexReport, TileIndexer};
pub use search::{SimilarDocument, SimilarityStore};
