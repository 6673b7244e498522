//! The built-in pipeline stages.
//!
//! Run in this order: location extraction asks the model which places the
//! conversation is about; location filtering resolves them into a spatial
//! predicate; document retrieval pulls the nearest indexed records, scoped by
//! that predicate when one exists.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use aher_core::{Message, Role};
use aher_geo::GeometryResolver;
use aher_vector::{EmbeddingProvider, SimilarityStore};

use crate::context::{flow_key, ConversationContext, FlowValue};
use crate::error::ChatError;
use crate::pipeline::Stage;
use crate::provider::ChatProvider;

/// Joins dialogue messages in the extraction prompt.
const DIALOGUE_SEPARATOR: &str = " | ";

fn extraction_prompt(dialogue: &str) -> String {
    format!(
        "Extract the locations from the text that the user and assistant appear to be interested in.\n\
         - Reply with a comma separated list of the locations, each in single quotes.\n\
         - Do not include any headers or other text.\n\
         - Reply on a single line.\n\n\
         TEXT: \"{}\"",
        dialogue
    )
}

// ---------------------------------------------------------------------------
// LocationExtractStage
// ---------------------------------------------------------------------------

/// Asks the chat model for the place names mentioned in the dialogue.
///
/// The raw reply is recorded verbatim; parsing happens downstream.
pub struct LocationExtractStage {
    provider: Arc<dyn ChatProvider>,
}

impl LocationExtractStage {
    pub const NAME: &'static str = "Location Extract Node";

    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for LocationExtractStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut ConversationContext,
    ) -> Result<Option<FlowValue>, ChatError> {
        let prompt = extraction_prompt(&context.dialogue(DIALOGUE_SEPARATOR));
        let locations = self.provider.complete_chat(&[Message::user(prompt)]).await?;
        debug!(%locations, "Extracted locations");
        Ok(Some(FlowValue::Text(locations)))
    }
}

// ---------------------------------------------------------------------------
// LocationFilterStage
// ---------------------------------------------------------------------------

/// Resolves extracted place names into a [`aher_core::SpatialPredicate`].
///
/// Without extraction output the context passes through unchanged. When no
/// place resolves, `SpatialFilter(None)` is recorded and retrieval runs
/// unscoped.
pub struct LocationFilterStage {
    resolver: Arc<GeometryResolver>,
    source_key: String,
}

impl LocationFilterStage {
    pub const NAME: &'static str = "Location Filter Node";

    pub fn new(resolver: Arc<GeometryResolver>) -> Self {
        Self {
            resolver,
            source_key: flow_key(LocationExtractStage::NAME),
        }
    }
}

#[async_trait]
impl Stage for LocationFilterStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut ConversationContext,
    ) -> Result<Option<FlowValue>, ChatError> {
        let Some(raw) = context
            .flow(&self.source_key)
            .and_then(FlowValue::as_text)
            .map(str::to_string)
        else {
            warn!(key = %self.source_key, "No extracted locations in flow data");
            return Ok(None);
        };

        let predicate = self.resolver.build_predicate(&raw).await;
        match &predicate {
            Some(p) => {
                info!(points = p.points().len(), threshold_m = p.threshold_m(), "Spatial filter built");
                context.push(Message::new(Role::Spatial, p.to_where_clause()));
            }
            None => info!("No locations resolved; retrieval will be unscoped"),
        }
        Ok(Some(FlowValue::SpatialFilter(predicate)))
    }
}

// ---------------------------------------------------------------------------
// DocumentRetrieveStage
// ---------------------------------------------------------------------------

/// Embeds the latest user message and appends the nearest documents as a
/// `documents` message.
pub struct DocumentRetrieveStage {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<SimilarityStore>,
    top_k: usize,
    filter_key: String,
}

impl DocumentRetrieveStage {
    pub const NAME: &'static str = "Document Retrieve Node";

    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<SimilarityStore>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k,
            filter_key: flow_key(LocationFilterStage::NAME),
        }
    }
}

#[async_trait]
impl Stage for DocumentRetrieveStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(
        &self,
        context: &mut ConversationContext,
    ) -> Result<Option<FlowValue>, ChatError> {
        let Some(query) = context.last_user_message().map(|m| m.content.clone()) else {
            warn!("No user message to retrieve documents for");
            return Ok(None);
        };

        let filter = context
            .flow(&self.filter_key)
            .and_then(FlowValue::as_spatial_filter)
            .flatten()
            .cloned();

        let embedding = self.embedder.embed_text(&query).await?;
        let hits = self
            .store
            .find_similar(&embedding, self.top_k, filter.as_ref(), None)?;
        info!(
            documents = hits.len(),
            scoped = filter.is_some(),
            "Retrieved documents"
        );

        if !hits.is_empty() {
            let rendered: Vec<String> = hits.iter().map(|h| h.document.clone()).collect();
            context.push(Message::new(Role::Documents, rendered.join("\n")));
        }
        Ok(Some(FlowValue::Documents(
            hits.into_iter().map(|h| h.document_id).collect(),
        )))
    }
}
