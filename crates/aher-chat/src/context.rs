//! Per-request conversation context.
//!
//! A [`ConversationContext`] carries the message list through the pipeline
//! together with the flow data: one typed entry per stage, keyed by the
//! stage's derived key. Messages can only be appended. Flow entries are
//! written by the pipeline engine from each stage's return value, never by
//! stages directly.

use std::collections::HashMap;

use uuid::Uuid;

use aher_core::{Message, SpatialPredicate};

/// Output recorded by a stage.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowValue {
    /// Free text, e.g. raw model output.
    Text(String),
    /// Spatial scope for retrieval; `None` means no filter could be built.
    SpatialFilter(Option<SpatialPredicate>),
    /// Ids of retrieved documents.
    Documents(Vec<Uuid>),
}

impl FlowValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FlowValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// `Some(None)` when the stage ran but produced no filter.
    pub fn as_spatial_filter(&self) -> Option<Option<&SpatialPredicate>> {
        match self {
            FlowValue::SpatialFilter(predicate) => Some(predicate.as_ref()),
            _ => None,
        }
    }

    pub fn as_documents(&self) -> Option<&[Uuid]> {
        match self {
            FlowValue::Documents(ids) => Some(ids),
            _ => None,
        }
    }
}

/// Flow data key for a stage name: lower-cased, spaces replaced by
/// underscores. `"Location Extract Node"` becomes `location_extract_node`.
pub fn flow_key(stage_name: &str) -> String {
    stage_name.to_lowercase().replace(' ', "_")
}

/// Messages plus flow data for one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct ConversationContext {
    messages: Vec<Message>,
    flow: HashMap<String, FlowValue>,
}

impl ConversationContext {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            flow: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent `user` message.
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == aher_core::Role::User)
    }

    /// Contents of all `user` and `assistant` messages, in order, each
    /// followed by `separator`.
    pub fn dialogue(&self, separator: &str) -> String {
        self.messages
            .iter()
            .filter(|m| m.role.is_dialogue())
            .fold(String::new(), |mut text, m| {
                text.push_str(&m.content);
                text.push_str(separator);
                text
            })
    }

    pub fn flow(&self, key: &str) -> Option<&FlowValue> {
        self.flow.get(key)
    }

    pub fn flow_keys(&self) -> impl Iterator<Item = &str> {
        self.flow.keys().map(String::as_str)
    }

    pub(crate) fn record(&mut self, key: &str, value: FlowValue) {
        self.flow.insert(key.to_string(), value);
    }

    pub(crate) fn clear_flow(&mut self) {
        self.flow.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aher_core::{Point, Role};

    #[test]
    fn test_flow_key_derivation() {
        assert_eq!(flow_key("Location Extract Node"), "location_extract_node");
        assert_eq!(flow_key("Location Filter Node"), "location_filter_node");
        assert_eq!(flow_key("retrieve"), "retrieve");
    }

    #[test]
    fn test_dialogue_skips_pipeline_roles() {
        let ctx = ConversationContext::new(vec![
            Message::system("You are a helpful assistant."),
            Message::user("I am interested in the history of Camden."),
            Message::assistant("What would you like to know?"),
            Message::new(Role::Spatial, "WHERE ..."),
            Message::user("What are the boundaries of Camden?"),
        ]);
        assert_eq!(
            ctx.dialogue(" | "),
            "I am interested in the history of Camden. | What would you like to know? | \
             What are the boundaries of Camden? | "
        );
    }

    #[test]
    fn test_last_user_message() {
        let mut ctx = ConversationContext::new(vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ]);
        ctx.push(Message::new(Role::Documents, "docs"));
        assert_eq!(ctx.last_user_message().unwrap().content, "second");
        assert!(ConversationContext::default().last_user_message().is_none());
    }

    #[test]
    fn test_flow_value_accessors() {
        let predicate = SpatialPredicate::new(vec![Point::new(1.0, 2.0)], 2000.0);
        let filter = FlowValue::SpatialFilter(predicate.clone());
        assert_eq!(filter.as_spatial_filter(), Some(predicate.as_ref()));
        assert_eq!(filter.as_text(), None);

        let none = FlowValue::SpatialFilter(None);
        assert_eq!(none.as_spatial_filter(), Some(None));

        let text = FlowValue::Text("'Camden'".to_string());
        assert_eq!(text.as_text(), Some("'Camden'"));
        assert_eq!(text.as_documents(), None);
    }

    #[test]
    fn test_clear_flow_keeps_messages() {
        let mut ctx = ConversationContext::new(vec![Message::user("hi")]);
        ctx.record("location_extract_node", FlowValue::Text("x".to_string()));
        assert!(ctx.flow("location_extract_node").is_some());

        ctx.clear_flow();
        assert!(ctx.flow("location_extract_node").is_none());
        assert_eq!(ctx.messages().len(), 1);
    }
}
