use serde::{Deserialize, Serialize};

use crate::spatial::Point;

// =============================================================================
// Conversation
// =============================================================================

/// Author of a conversation message.
///
/// `Spatial` and `Documents` are produced by pipeline stages; backends that
/// only understand the chat-completion roles receive them as `system`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Spatial,
    Documents,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Spatial => "spatial",
            Role::Documents => "documents",
        }
    }

    /// Whether messages with this role are folded into extraction prompts.
    pub fn is_dialogue(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }

    /// The role name understood by chat-completion backends.
    pub fn completion_role(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System | Role::Spatial | Role::Documents => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// A boundary feature matched in a catalog, reduced to one representative
/// planar point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryFeature {
    /// Feature name as reported by the catalog.
    pub name: String,
    /// Feature description (e.g. "London Borough").
    pub description: String,
    /// Representative point as well-known text, e.g. `POINT (-15751.6 6711364.9)`.
    pub geometry: String,
    /// Catalog (tier) the feature came from.
    pub source_catalog: u8,
    /// The same point in planar coordinates.
    #[serde(skip)]
    pub point: Point,
}

impl GeometryFeature {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        point: Point,
        source_catalog: u8,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            geometry: point.to_wkt(),
            source_catalog,
            point,
        }
    }

    /// `name (description)`, as listed in disambiguation prompts.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.description)
    }
}

// =============================================================================
// Embeddings
// =============================================================================

/// A dense embedding vector.
pub type EmbeddingVector = Vec<f32>;
