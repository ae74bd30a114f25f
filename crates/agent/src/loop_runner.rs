//! The agent loop controller.
//!
//! Each iteration asks the model for one decision, carries it out, and feeds
//! the outcome back into the context of the next iteration:
//!
//! - **action**: run the tool, append the observation
//! - **plan** / **reflection**: record it and think again
//! - **final_answer**: stop and return the answer
//!
//! Replies that carry no usable decision are taken as the final answer.
//! The run stops with [`AgentError::MaxThoughtsReached`] when the thought
//! budget runs out first.

use std::sync::Arc;
use stepwise_core::agent::{AgentConfig, AgentStepType};
use stepwise_core::error::{AgentError, Error};
use stepwise_core::message::{ConversationId, FileAttachment, Message};
use stepwise_core::provider::{
    CallContext, CallSource, ChatRequest, Provider, RequestMetadata, Usage,
};
use stepwise_core::tool::{InvocationContext, ToolRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accumulator::think;
use crate::directive::{AgentDirective, decode_directive};
use crate::dispatcher::{DispatchError, ToolDispatcher, failure_message};
use crate::prompt::build_system_prompt;
use crate::step::{AgentStepKind, StepEmitter, StepObserver};

/// Everything one run needs from its caller.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub conversation_id: ConversationId,
    pub config: AgentConfig,
    /// Conversation so far, oldest first
    pub context: Vec<Message>,
    pub model: String,
    /// Opaque payload forwarded with every model call
    pub payload: Option<serde_json::Value>,
    /// Handed to every tool invocation
    pub invocation_context: Option<InvocationContext>,
}

impl AgentRequest {
    pub fn new(model: impl Into<String>, config: AgentConfig, context: Vec<Message>) -> Self {
        Self {
            conversation_id: ConversationId::new(),
            config,
            context,
            model: model.into(),
            payload: None,
            invocation_context: None,
        }
    }

    pub fn with_conversation_id(mut self, id: ConversationId) -> Self {
        self.conversation_id = id;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_invocation_context(mut self, context: InvocationContext) -> Self {
        self.invocation_context = Some(context);
        self
    }

    fn chat_request(
        &self,
        messages: Vec<Message>,
        step_index: Option<u32>,
        source: CallSource,
    ) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            metadata: RequestMetadata {
                payload: self.payload.clone(),
                context: CallContext {
                    conversation_id: self.conversation_id.clone(),
                    step_index,
                    source,
                },
            },
        }
    }
}

/// Runs agent requests against one provider and tool registry.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    streaming: bool,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            streaming: true,
        }
    }

    /// Consume model output incrementally (default) or one reply at a time.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Run to completion on the current task.
    pub async fn run(
        &self,
        request: AgentRequest,
        observer: Arc<dyn StepObserver>,
    ) -> Result<Message, AgentError> {
        self.drive(request, observer, || false).await
    }

    /// Run on a spawned task.
    ///
    /// The returned [`AgentRun`] yields exactly one result unless the run is
    /// cancelled, in which case it yields nothing.
    pub fn execute(&self, request: AgentRequest, observer: Arc<dyn StepObserver>) -> AgentRun {
        let (tx, rx) = mpsc::channel(1);
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let result = this.drive(request, observer, || tx.is_closed()).await;
            if matches!(result, Err(AgentError::Cancelled)) {
                return;
            }
            let _ = tx.send(result).await;
        });

        AgentRun { rx, handle }
    }

    async fn drive(
        &self,
        request: AgentRequest,
        observer: Arc<dyn StepObserver>,
        cancelled: impl Fn() -> bool + Send,
    ) -> Result<Message, AgentError> {
        if let Err(e) = request.config.validate() {
            let message = match e {
                Error::Config { message } => message,
                other => other.to_string(),
            };
            return Err(AgentError::InvalidConfig(message));
        }
        if cancelled() {
            return Err(AgentError::Cancelled);
        }

        let config = &request.config;
        let actions = config.allows(AgentStepType::Action);
        let definitions = if actions {
            self.tools.definitions(&config.tools)
        } else {
            Vec::new()
        };

        let mut context = Vec::with_capacity(request.context.len() + 1);
        if let Some(prompt) = build_system_prompt(config, &definitions) {
            context.push(Message::system(prompt));
        }
        context.extend(request.context.iter().cloned());

        if config.is_direct_chat() {
            info!(conversation_id = %request.conversation_id, model = %request.model, "Direct chat");
            let chat = request.chat_request(context, None, CallSource::DirectChat);
            let reply = think(self.provider.as_ref(), chat, None, self.streaming).await?;
            return Ok(reply.into_message());
        }

        let dispatcher = ToolDispatcher::new(self.tools.clone(), config.tools.clone());
        let mut emitter = StepEmitter::new(observer);
        let mut files: Vec<FileAttachment> = Vec::new();
        let mut usage: Option<Usage> = None;
        let max_thoughts = config.max_thoughts;

        info!(
            conversation_id = %request.conversation_id,
            model = %request.model,
            max_thoughts,
            tools = definitions.len(),
            streaming = self.streaming,
            "Agent run starting"
        );

        for thought in 1..=max_thoughts {
            if cancelled() {
                info!(conversation_id = %request.conversation_id, thought, "Agent run cancelled");
                return Err(AgentError::Cancelled);
            }
            debug!(conversation_id = %request.conversation_id, thought, "Thinking");

            let chat =
                request.chat_request(context.clone(), Some(thought), CallSource::AgentThought);
            let reply = think(
                self.provider.as_ref(),
                chat,
                Some(&mut emitter),
                self.streaming,
            )
            .await?;
            files.extend(reply.files.iter().cloned());
            if reply.usage.is_some() {
                usage = reply.usage;
            }

            let decision = match decode_directive(&reply.content) {
                Ok(Some(decision)) => decision,
                Ok(None) => {
                    warn!(thought, "Reply has no decision, using it as the final answer");
                    return Ok(final_message(reply.content, files, usage));
                }
                Err(e) => {
                    warn!(thought, error = %e, "Malformed action");
                    return Err(AgentError::InvalidToolCall(e.to_string()));
                }
            };

            match decision.directive {
                AgentDirective::FinalAnswer(answer) => {
                    info!(
                        conversation_id = %request.conversation_id,
                        thoughts = thought,
                        steps = emitter.steps_taken(),
                        "Agent run finished"
                    );
                    return Ok(final_message(answer, files, usage));
                }
                AgentDirective::Plan(plan) => {
                    debug!(thought, "Plan");
                    emitter
                        .emit(AgentStepKind::Plan, plan.clone(), decision.title)
                        .await;
                    context.push(Message::assistant(reply.content));
                    context.push(Message::assistant(format!("Plan: {plan}")));
                }
                AgentDirective::Reflection(reflection) => {
                    debug!(thought, "Reflection");
                    emitter
                        .emit(AgentStepKind::Reflection, reflection.clone(), decision.title)
                        .await;
                    context.push(Message::assistant(reply.content));
                    context.push(Message::assistant(format!("Reflection: {reflection}")));
                }
                AgentDirective::Action(call) => {
                    emitter
                        .emit(
                            AgentStepKind::Action,
                            format!("{}({})", call.tool, call.input),
                            decision.title,
                        )
                        .await;
                    if cancelled() {
                        info!(conversation_id = %request.conversation_id, thought, "Agent run cancelled");
                        return Err(AgentError::Cancelled);
                    }

                    let outcome = dispatcher
                        .execute(&call, request.invocation_context.as_ref())
                        .await;
                    context.push(Message::assistant(reply.content));
                    match outcome {
                        Ok(output) => {
                            let observation = format!("Observation: {output}");
                            emitter
                                .emit(AgentStepKind::Observation, observation.clone(), None)
                                .await;
                            context.push(Message::system(observation));
                        }
                        Err(DispatchError::NotFound(name)) => {
                            return Err(AgentError::ToolNotFound(name));
                        }
                        Err(DispatchError::Failed(e)) => {
                            let message = failure_message(&e);
                            emitter
                                .emit(AgentStepKind::Observation, format!("Error: {message}"), None)
                                .await;
                            context.push(Message::system(format!(
                                "Tool execution failed: {message}"
                            )));
                        }
                    }
                }
            }
        }

        warn!(conversation_id = %request.conversation_id, max_thoughts, "Thought budget exhausted");
        Err(AgentError::MaxThoughtsReached { max_thoughts })
    }
}

fn final_message(content: String, files: Vec<FileAttachment>, usage: Option<Usage>) -> Message {
    Message::assistant(content)
        .with_files(files)
        .with_usage(usage)
}

/// Handle to a run started with [`AgentLoop::execute`].
///
/// Dropping the handle cancels the run.
pub struct AgentRun {
    rx: mpsc::Receiver<Result<Message, AgentError>>,
    handle: JoinHandle<()>,
}

impl AgentRun {
    /// The run's result, or `None` once the run is over or was cancelled.
    pub async fn next(&mut self) -> Option<Result<Message, AgentError>> {
        self.rx.recv().await
    }

    /// Wait for the result.
    pub async fn finish(mut self) -> Result<Message, AgentError> {
        self.rx.recv().await.unwrap_or(Err(AgentError::Cancelled))
    }

    /// Stop the run at its next suspension point. No further steps are
    /// emitted, no tool is started, and no result is produced.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for AgentRun {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
