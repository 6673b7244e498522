//! Conversation pipeline for the AHER assistant.
//!
//! Incoming messages pass through an ordered [`ChatFlow`] of stages that
//! extract place names, turn them into a spatial filter and retrieve nearby
//! heritage records, before a [`ChatProvider`] completes the enriched
//! conversation.

pub mod assistant;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod stages;

pub use assistant::{ChatAssistant, ChatReply, Retrieval};
pub use context::{flow_key, ConversationContext, FlowValue};
pub use error::ChatError;
pub use pipeline::{ChatFlow, Stage};
pub use provider::{AzureOpenAiChat, ChatBackend, ChatProvider, OllamaChat};
pub use stages::{DocumentRetrieveStage, LocationExtractStage, LocationFilterStage};
