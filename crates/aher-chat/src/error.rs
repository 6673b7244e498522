//! Error types for the conversation pipeline.

use aher_core::error::AherError;

/// Errors from the chat pipeline and chat backends.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("conversation has no messages")]
    EmptyConversation,
    #[error("chat provider error: {0}")]
    Provider(String),
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        source: Box<ChatError>,
    },
    #[error("stage key '{0}' is already registered")]
    DuplicateStageKey(String),
    #[error(transparent)]
    Core(#[from] AherError),
}

impl ChatError {
    /// Name of the pipeline stage that failed, if the error came from one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ChatError::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

impl From<ChatError> for AherError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Core(inner) => inner,
            other => AherError::Api(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(
            ChatError::EmptyConversation.to_string(),
            "conversation has no messages"
        );
        assert_eq!(
            ChatError::Provider("HTTP 502".to_string()).to_string(),
            "chat provider error: HTTP 502"
        );
        assert_eq!(
            ChatError::DuplicateStageKey("location_extract_node".to_string()).to_string(),
            "stage key 'location_extract_node' is already registered"
        );
    }

    #[test]
    fn test_stage_error_names_the_stage() {
        let err = ChatError::Stage {
            stage: "Location Extract Node".to_string(),
            source: Box::new(ChatError::Provider("connection refused".to_string())),
        };
        assert_eq!(err.stage(), Some("Location Extract Node"));
        assert_eq!(
            err.to_string(),
            "stage 'Location Extract Node' failed: chat provider error: connection refused"
        );
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(ChatError::EmptyConversation.stage(), None);
    }

    #[test]
    fn test_core_error_converts_both_ways() {
        let chat: ChatError = AherError::Transport("catalog down".to_string()).into();
        assert!(matches!(chat, ChatError::Core(AherError::Transport(_))));

        let back: AherError = chat.into();
        assert!(matches!(back, AherError::Transport(_)));

        let api: AherError = ChatError::EmptyConversation.into();
        assert!(matches!(api, AherError::Api(_)));
    }
}
