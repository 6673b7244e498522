//! Route handler functions.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aher_chat::ChatReply;
use aher_core::Message;
use aher_geo::Resolution;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /chatapi/.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub indexed_documents: usize,
}

/// POST /chatapi/ - run the conversation pipeline and complete the reply.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if body.messages.is_empty() {
        return Err(ApiError::BadRequest("'messages' must not be empty".to_string()));
    }

    info!(messages = body.messages.len(), "Chat request");
    let reply = state.assistant.reply(body.messages).await?;
    Ok(Json(reply))
}

/// GET /aiapi/?q=<name> - resolve one place name, reporting ambiguity.
pub async fn lookup(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<Resolution>, ApiError> {
    let name = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("query parameter 'q' is required".to_string()))?;

    debug!(%name, "Location lookup");
    Ok(Json(state.resolver.lookup(name).await))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        indexed_documents: state.store.len(),
    })
}
