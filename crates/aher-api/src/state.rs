//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use aher_chat::ChatAssistant;
use aher_core::config::AherConfig;
use aher_geo::GeometryResolver;
use aher_vector::SimilarityStore;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. Nothing here
/// is mutated per request; the store is written only by the indexing job.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AherConfig>,
    /// Pipeline plus terminal chat completion.
    pub assistant: Arc<ChatAssistant>,
    /// Standalone place-name lookups.
    pub resolver: Arc<GeometryResolver>,
    pub store: Arc<SimilarityStore>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AherConfig,
        assistant: Arc<ChatAssistant>,
        resolver: Arc<GeometryResolver>,
        store: Arc<SimilarityStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            assistant,
            resolver,
            store,
            start_time: Instant::now(),
        }
    }
}
