//! Chat completion backends.
//!
//! [`ChatBackend`] is the closed set of backends selectable from
//! configuration. Backends only understand the `system`, `user` and
//! `assistant` roles, so pipeline-produced messages are sent as `system`.
//! No streaming and no retries: a failed call is returned to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aher_core::config::{AherConfig, AzureConfig, OllamaConfig};
use aher_core::error::AherError;
use aher_core::Message;

use crate::error::ChatError;

/// A language model that completes a conversation.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Complete `messages` and return the model's reply text.
    async fn complete_chat(&self, messages: &[Message]) -> Result<String, ChatError>;
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn wire_messages(messages: &[Message]) -> Result<Vec<WireMessage<'_>>, ChatError> {
    if messages.is_empty() {
        return Err(ChatError::EmptyConversation);
    }
    Ok(messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.completion_role(),
            content: &m.content,
        })
        .collect())
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AherError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AherError::Config(format!("Failed to build HTTP client: {}", e)))
}

async fn read_success(response: reqwest::Response, backend: &str) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Provider(format!("{} HTTP {}: {}", backend, status, body)))
}

// ---------------------------------------------------------------------------
// AzureOpenAiChat
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AzureChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct AzureChatResponse {
    choices: Vec<AzureChoice>,
}

#[derive(Deserialize)]
struct AzureChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Azure OpenAI chat completions deployment.
#[derive(Debug, Clone)]
pub struct AzureOpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    deployment: String,
    model: String,
}

impl AzureOpenAiChat {
    pub fn new(config: &AzureConfig) -> Result<Self, AherError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            deployment: config.chat_deployment.clone(),
            model: config.chat_model.clone(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ChatProvider for AzureOpenAiChat {
    async fn complete_chat(&self, messages: &[Message]) -> Result<String, ChatError> {
        let request = AzureChatRequest {
            model: &self.model,
            messages: wire_messages(messages)?,
        };
        debug!(messages = messages.len(), deployment = %self.deployment, "Requesting Azure chat completion");

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Provider(format!("Azure chat request failed: {}", e)))?;
        let parsed: AzureChatResponse = read_success(response, "Azure chat")
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Provider(format!("Azure chat decode failed: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::Provider("Azure chat returned no content".to_string()))
    }
}

// ---------------------------------------------------------------------------
// OllamaChat
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ReplyMessage,
}

/// Language model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(config: &OllamaConfig) -> Result<Self, AherError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.language_model.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn complete_chat(&self, messages: &[Message]) -> Result<String, ChatError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: wire_messages(messages)?,
            stream: false,
        };
        debug!(messages = messages.len(), model = %self.model, "Requesting Ollama chat completion");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Provider(format!("Ollama chat request failed: {}", e)))?;
        let parsed: OllamaChatResponse = read_success(response, "Ollama chat")
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Provider(format!("Ollama chat decode failed: {}", e)))?;

        parsed
            .message
            .content
            .ok_or_else(|| ChatError::Provider("Ollama chat returned no content".to_string()))
    }
}

// ---------------------------------------------------------------------------
// ChatBackend
// ---------------------------------------------------------------------------

/// Chat backends selectable by the `chat.provider` setting.
#[derive(Debug, Clone)]
pub enum ChatBackend {
    Azure(AzureOpenAiChat),
    Ollama(OllamaChat),
}

impl ChatBackend {
    /// Build the configured backend. Unknown identifiers fail immediately;
    /// credentials and connectivity are not checked here.
    pub fn from_config(config: &AherConfig) -> Result<Self, AherError> {
        let backend = match config.chat.provider.trim().to_lowercase().as_str() {
            "azure" => ChatBackend::Azure(AzureOpenAiChat::new(&config.azure)?),
            "ollama" => ChatBackend::Ollama(OllamaChat::new(&config.ollama)?),
            _ => {
                return Err(AherError::UnsupportedProvider {
                    kind: "chat",
                    name: config.chat.provider.clone(),
                })
            }
        };
        info!(provider = backend.name(), "Chat backend configured");
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatBackend::Azure(_) => "azure",
            ChatBackend::Ollama(_) => "ollama",
        }
    }
}

#[async_trait]
impl ChatProvider for ChatBackend {
    async fn complete_chat(&self, messages: &[Message]) -> Result<String, ChatError> {
        match self {
            ChatBackend::Azure(p) => p.complete_chat(messages).await,
            ChatBackend::Ollama(p) => p.complete_chat(messages).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aher_core::Role;
    use mockito::Matcher;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are a helpful assistant."),
            Message::user("What are the boundaries of Camden?"),
            Message::new(Role::Spatial, "WHERE ST_Distance(...) < 2000"),
        ]
    }

    #[test]
    fn test_unknown_provider_fails_fast() {
        let mut config = AherConfig::default();
        config.chat.provider = "watson".to_string();
        let err = ChatBackend::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            AherError::UnsupportedProvider { kind: "chat", ref name } if name == "watson"
        ));
    }

    #[test]
    fn test_known_providers_construct_without_network() {
        let mut config = AherConfig::default();
        config.chat.provider = "Azure".to_string();
        assert_eq!(ChatBackend::from_config(&config).unwrap().name(), "azure");
        config.chat.provider = "ollama".to_string();
        assert_eq!(ChatBackend::from_config(&config).unwrap().name(), "ollama");
    }

    #[tokio::test]
    async fn test_azure_completion_maps_roles() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
            .match_query(Matcher::UrlEncoded(
                "api-version".to_string(),
                "2024-02-01".to_string(),
            ))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(json!({
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": "What are the boundaries of Camden?"},
                    {"role": "system", "content": "WHERE ST_Distance(...) < 2000"}
                ]
            })))
            .with_status(200)
            .with_body(
                json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "Camden is a London borough."}}]})
                    .to_string(),
            )
            .create_async()
            .await;

        let config = AzureConfig {
            endpoint: server.url(),
            api_key: "secret".to_string(),
            ..AzureConfig::default()
        };
        let chat = AzureOpenAiChat::new(&config).unwrap();
        let reply = chat.complete_chat(&conversation()).await.unwrap();
        assert_eq!(reply, "Camden is a London borough.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ollama_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({"model": "llama3.1", "stream": false})))
            .with_status(200)
            .with_body(
                json!({"model": "llama3.1", "message": {"role": "assistant", "content": "'Camden'"}, "done": true})
                    .to_string(),
            )
            .create_async()
            .await;

        let config = OllamaConfig {
            base_url: server.url(),
            ..OllamaConfig::default()
        };
        let chat = OllamaChat::new(&config).unwrap();
        assert_eq!(chat.complete_chat(&conversation()).await.unwrap(), "'Camden'");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_propagates() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let config = OllamaConfig {
            base_url: server.url(),
            ..OllamaConfig::default()
        };
        let err = OllamaChat::new(&config)
            .unwrap()
            .complete_chat(&conversation())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Provider(ref msg) if msg.contains("model not loaded")));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_provider_error() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..OllamaConfig::default()
        };
        let err = OllamaChat::new(&config)
            .unwrap()
            .complete_chat(&conversation())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Provider(_)));
    }

    #[tokio::test]
    async fn test_empty_conversation_is_rejected_before_request() {
        let chat = OllamaChat::new(&OllamaConfig::default()).unwrap();
        assert!(matches!(
            chat.complete_chat(&[]).await,
            Err(ChatError::EmptyConversation)
        ));
    }
}
