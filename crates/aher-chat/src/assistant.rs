//! The conversational assistant: pipeline stages followed by one chat
//! completion over the enriched messages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use aher_core::config::ChatConfig;
use aher_core::Message;
use aher_geo::GeometryResolver;
use aher_vector::{EmbeddingProvider, SimilarityStore};

use crate::context::ConversationContext;
use crate::error::ChatError;
use crate::pipeline::ChatFlow;
use crate::provider::ChatProvider;
use crate::stages::{DocumentRetrieveStage, LocationExtractStage, LocationFilterStage};

/// Body returned for a completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
}

/// Everything the document retrieval stage needs.
#[derive(Clone)]
pub struct Retrieval {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<SimilarityStore>,
}

pub struct ChatAssistant {
    flow: ChatFlow,
    provider: Arc<dyn ChatProvider>,
}

impl ChatAssistant {
    pub fn new(flow: ChatFlow, provider: Arc<dyn ChatProvider>) -> Self {
        Self { flow, provider }
    }

    /// The standard pipeline: extract locations, filter by location and,
    /// when `retrieval` is given and enabled in `config`, retrieve documents.
    pub fn standard(
        config: &ChatConfig,
        provider: Arc<dyn ChatProvider>,
        resolver: Arc<GeometryResolver>,
        retrieval: Option<Retrieval>,
    ) -> Result<Self, ChatError> {
        let mut flow = ChatFlow::new();
        flow.register(LocationExtractStage::new(provider.clone()))?;
        flow.register(LocationFilterStage::new(resolver))?;
        if config.retrieval {
            if let Some(r) = retrieval {
                flow.register(DocumentRetrieveStage::new(r.embedder, r.store, config.top_k))?;
            }
        }
        info!(stages = ?flow, "Chat pipeline assembled");
        Ok(Self::new(flow, provider))
    }

    pub fn flow(&self) -> &ChatFlow {
        &self.flow
    }

    /// Run the pipeline over `messages` and complete the enriched
    /// conversation.
    pub async fn reply(&self, messages: Vec<Message>) -> Result<ChatReply, ChatError> {
        if messages.is_empty() {
            return Err(ChatError::EmptyConversation);
        }
        let mut context = ConversationContext::new(messages);
        self.flow.execute(&mut context).await?;
        let response = self.provider.complete_chat(context.messages()).await?;
        Ok(ChatReply { response })
    }
}
