//! Folding one model turn into a message.
//!
//! In streaming mode the fragments of a response are folded into an
//! [`AccumulatedMessage`]; each fold produces a new value rather than
//! editing the previous one. While content arrives, the readable part of
//! the thought is published as a growing thought step.

use stepwise_core::error::AgentError;
use stepwise_core::message::{FileAttachment, Message, Role};
use stepwise_core::provider::{ChatRequest, Provider, StreamFragment, Usage};
use tracing::debug;

use crate::directive::live_display;
use crate::step::{AgentStepKind, StepEmitter, StepSlot};

/// The response to one model turn, as seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub files: Vec<FileAttachment>,
    /// Usage from the most recent settlement, if any
    pub usage: Option<Usage>,
}

impl AccumulatedMessage {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            files: Vec::new(),
            usage: None,
        }
    }

    /// Fold one fragment in.
    ///
    /// Deltas append content and files. Only a settlement sets usage; the
    /// provisional usage a delta may carry is ignored.
    pub fn apply(self, fragment: StreamFragment) -> Self {
        match fragment {
            StreamFragment::Delta(delta) => {
                let mut content = self.content;
                if let Some(text) = delta.content {
                    content.push_str(&text);
                }
                let mut files = self.files;
                files.extend(delta.files);
                Self {
                    content,
                    files,
                    ..self
                }
            }
            StreamFragment::Settlement(usage) => Self {
                usage: Some(usage),
                ..self
            },
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            role: self.role,
            content: self.content,
            files: self.files,
            usage: self.usage,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for AccumulatedMessage {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold fragments onto an optional starting state.
///
/// The state exists from the first fragment on; folding nothing onto nothing
/// yields nothing.
pub fn accumulate(
    start: Option<AccumulatedMessage>,
    fragments: impl IntoIterator<Item = StreamFragment>,
) -> Option<AccumulatedMessage> {
    fragments.into_iter().fold(start, |state, fragment| {
        Some(state.unwrap_or_default().apply(fragment))
    })
}

/// Run one model turn and return what it produced.
///
/// With an emitter, the turn is reported as a single thought step: updated
/// in place while streaming, or published once when not. Without one (direct
/// chat) nothing is reported.
pub async fn think(
    provider: &dyn Provider,
    request: ChatRequest,
    emitter: Option<&mut StepEmitter>,
    streaming: bool,
) -> Result<AccumulatedMessage, AgentError> {
    if streaming {
        think_streaming(provider, request, emitter).await
    } else {
        think_once(provider, request, emitter).await
    }
}

async fn think_streaming(
    provider: &dyn Provider,
    request: ChatRequest,
    mut emitter: Option<&mut StepEmitter>,
) -> Result<AccumulatedMessage, AgentError> {
    let mut rx = provider.stream_chat(request).await?;

    // Reserved on first publish.
    let mut slot: Option<StepSlot> = None;
    let mut state: Option<AccumulatedMessage> = None;
    let mut shown = 0usize;
    let mut fragments = 0usize;

    while let Some(item) = rx.recv().await {
        let fragment = item?;
        fragments += 1;
        let carries_content = matches!(fragment, StreamFragment::Delta(_));
        let next = state.take().unwrap_or_default().apply(fragment);

        if carries_content && let Some(emitter) = emitter.as_deref_mut() {
            let display = live_display(&next.content);
            if display.len() > shown {
                shown = display.len();
                let slot = slot.get_or_insert_with(|| emitter.reserve());
                emitter
                    .publish(slot, AgentStepKind::Thought, display, None)
                    .await;
            }
        }
        state = Some(next);
    }

    debug!(fragments, "Thought stream finished");
    let state =
        state.ok_or_else(|| AgentError::ToolExecutionFailed("No response from the model".into()))?;

    // Nothing readable streamed, e.g. an envelope without reasoning.
    if shown == 0
        && !state.content.trim().is_empty()
        && let Some(emitter) = emitter
    {
        let slot = slot.get_or_insert_with(|| emitter.reserve());
        emitter
            .publish(slot, AgentStepKind::Thought, state.content.clone(), None)
            .await;
    }

    Ok(state)
}

async fn think_once(
    provider: &dyn Provider,
    request: ChatRequest,
    emitter: Option<&mut StepEmitter>,
) -> Result<AccumulatedMessage, AgentError> {
    let response = provider.chat(request).await?;
    let message = response
        .message
        .ok_or_else(|| AgentError::ToolExecutionFailed("No response from the model".into()))?;
    if message.content.trim().is_empty() {
        return Err(AgentError::ToolExecutionFailed(
            "Empty response from the model".into(),
        ));
    }

    if let Some(emitter) = emitter {
        let display = live_display(&message.content);
        let shown = if display.is_empty() {
            message.content.clone()
        } else {
            display
        };
        emitter.emit(AgentStepKind::Thought, shown, None).await;
    }

    Ok(AccumulatedMessage {
        id: message.id,
        role: Role::Assistant,
        content: message.content,
        files: message.files,
        usage: response.usage.or(message.usage),
    })
}
