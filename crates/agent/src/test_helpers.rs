//! Shared test helpers for agent tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stepwise_core::error::{ProviderError, ToolError};
use stepwise_core::message::{ConversationId, FileAttachment, Message};
use stepwise_core::provider::{
    CallContext, CallSource, ChatRequest, ChatResponse, FragmentReceiver, MessageDelta, Provider,
    RequestMetadata, StreamFragment, Usage,
};
use stepwise_core::tool::{InvocationContext, Tool};
use tokio::sync::mpsc;

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    WithFiles(String, Vec<FileAttachment>),
    Fail(ProviderError),
    /// No message at all.
    Silent,
}

/// A provider that plays back a script, one entry per call.
///
/// Panics if more calls are made than entries provided.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk_size: usize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<String>) -> Self {
        Self::from_script(replies.into_iter().map(ScriptedReply::Text).collect())
    }

    pub fn from_script(script: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            chunk_size: usize::MAX,
            delay: None,
        }
    }

    /// A provider whose only reply is empty.
    pub fn silent() -> Self {
        Self::from_script(vec![ScriptedReply::Silent])
    }

    /// Stream replies in chunks of `chars` characters.
    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size = chars.max(1);
        self
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn next_reply(&self, request: ChatRequest) -> ScriptedReply {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no reply scripted for call #{call}"))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let (message, usage) = match self.next_reply(request).await {
            ScriptedReply::Text(text) => (Some(Message::assistant(text)), Some(make_usage())),
            ScriptedReply::WithFiles(text, files) => (
                Some(Message::assistant(text).with_files(files)),
                Some(make_usage()),
            ),
            ScriptedReply::Fail(e) => return Err(e),
            ScriptedReply::Silent => (None, None),
        };
        Ok(ChatResponse {
            message,
            usage,
            model: "scripted-model".into(),
        })
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentReceiver, ProviderError> {
        let (text, files) = match self.next_reply(request).await {
            ScriptedReply::Text(text) => (text, Vec::new()),
            ScriptedReply::WithFiles(text, files) => (text, files),
            ScriptedReply::Fail(e) => return Err(e),
            ScriptedReply::Silent => {
                let (_tx, rx) = mpsc::channel(1);
                return Ok(rx);
            }
        };

        let mut fragments: Vec<StreamFragment> = split_chars(&text, self.chunk_size)
            .into_iter()
            .map(|chunk| StreamFragment::Delta(MessageDelta::text(chunk)))
            .collect();
        if !files.is_empty() {
            fragments.push(StreamFragment::Delta(MessageDelta {
                content: None,
                files,
                usage: None,
            }));
        }
        fragments.push(StreamFragment::Settlement(make_usage()));

        let (tx, rx) = mpsc::channel(fragments.len());
        for fragment in fragments {
            tx.send(Ok(fragment)).await.unwrap();
        }
        Ok(rx)
    }
}

fn split_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

pub fn make_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A bare request for calling a provider directly.
pub fn request_for(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.into(),
        messages: vec![Message::user("hi")],
        temperature: 0.0,
        max_tokens: None,
        metadata: RequestMetadata {
            payload: None,
            context: CallContext {
                conversation_id: ConversationId::new(),
                step_index: None,
                source: CallSource::DirectChat,
            },
        },
    }
}

/// An action envelope.
pub fn action(tool: &str, input: &str) -> String {
    serde_json::json!({
        "reasoning": format!("I should use {tool}"),
        "decision": {"type": "action", "tool": tool, "input": input},
    })
    .to_string()
}

/// A final answer envelope.
pub fn final_answer(content: &str) -> String {
    serde_json::json!({
        "reasoning": "I know the answer",
        "decision": {"type": "final_answer", "content": content},
    })
    .to_string()
}

/// A tool with a fixed outcome that counts its calls.
pub struct ScriptedTool {
    name: String,
    outcome: Result<String, String>,
    calls: AtomicUsize,
    last_context: Mutex<Option<InvocationContext>>,
}

impl ScriptedTool {
    pub fn ok(name: &str, output: &str) -> Self {
        Self::with_outcome(name, Ok(output.to_string()))
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self::with_outcome(name, Err(reason.to_string()))
    }

    fn with_outcome(name: &str, outcome: Result<String, String>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<InvocationContext> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A scripted tool for tests"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "string"})
    }

    async fn execute(
        &self,
        _input: &str,
        context: Option<&InvocationContext>,
    ) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.cloned();
        self.outcome
            .clone()
            .map_err(|reason| ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason,
            })
    }
}
