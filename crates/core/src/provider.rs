//! Provider trait — the abstraction over LLM transports.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message (`chat`) or as a stream of fragments
//! (`stream_chat`).
//!
//! Implementations: OpenAI-compatible endpoints (see `stepwise-providers`),
//! scripted providers in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ConversationId, FileAttachment, Message};

/// Where an LLM call originates inside the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSource {
    /// Agent mode is off; the model answers the conversation directly.
    DirectChat,
    /// One thought of the agent loop.
    AgentThought,
}

/// Fixed, runtime-owned request context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub conversation_id: ConversationId,

    /// 1-based thought index within the run (absent in direct chat)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<u32>,

    pub source: CallSource,
}

/// Metadata attached to every provider request.
///
/// The caller's opaque payload travels next to the runtime's own context
/// instead of being merged into one untyped map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Opaque, caller-supplied payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    pub context: CallContext,
}

/// A request for one model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 2.0 = very creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    pub metadata: RequestMetadata,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated message, if the provider produced one
    pub message: Option<Message>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Incremental content of a streamed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDelta {
    /// Text to append
    #[serde(default)]
    pub content: Option<String>,

    /// Files to append
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,

    /// Provisional usage; not authoritative mid-stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl MessageDelta {
    /// A delta carrying only text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// A single item of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFragment {
    /// Content, files, or provisional usage
    Delta(MessageDelta),
    /// The terminal usage/billing record for the response
    Settlement(Usage),
}

/// Receiving end of a streamed response.
pub type FragmentReceiver = mpsc::Receiver<std::result::Result<StreamFragment, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `chat()` or `stream_chat()` without knowing which
/// backend is used. Retries and timeouts, if any, belong to the implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn chat(&self, request: ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;

    /// Send a request and get a stream of response fragments.
    ///
    /// Default implementation calls `chat()` and replays the result as one
    /// delta followed by a settlement.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> std::result::Result<FragmentReceiver, ProviderError> {
        let response = self.chat(request).await?;
        let (tx, rx) = mpsc::channel(2);
        if let Some(message) = response.message {
            let _ = tx
                .send(Ok(StreamFragment::Delta(MessageDelta {
                    content: Some(message.content),
                    files: message.files,
                    usage: None,
                })))
                .await;
        }
        if let Some(usage) = response.usage {
            let _ = tx.send(Ok(StreamFragment::Settlement(usage))).await;
        }
        Ok(rx)
    }
}
