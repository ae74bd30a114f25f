//! Agent steps: the observable trace of a run.
//!
//! Every thought, action, observation, plan, and reflection is reported to a
//! [`StepObserver`] as an [`AgentStep`]. Step numbers increase strictly within
//! a run; a streamed thought is re-published under one id and number as its
//! text grows, so consumers should treat a repeated id as an update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What kind of step was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepKind {
    Thought,
    Action,
    Observation,
    Plan,
    Reflection,
}

/// One entry of the run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: String,
    pub step_number: u32,
    #[serde(rename = "type")]
    pub kind: AgentStepKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    /// Event name for this step, for transports that label their frames.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            AgentStepKind::Thought => "thought",
            AgentStepKind::Action => "action",
            AgentStepKind::Observation => "observation",
            AgentStepKind::Plan => "plan",
            AgentStepKind::Reflection => "reflection",
        }
    }
}

/// Receives steps as the loop produces them.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, step: AgentStep);
}

/// Discards every step.
pub struct NoopObserver;

#[async_trait]
impl StepObserver for NoopObserver {
    async fn on_step(&self, _step: AgentStep) {}
}

#[async_trait]
impl StepObserver for mpsc::UnboundedSender<AgentStep> {
    async fn on_step(&self, step: AgentStep) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(step);
    }
}

#[async_trait]
impl StepObserver for mpsc::Sender<AgentStep> {
    async fn on_step(&self, step: AgentStep) {
        let _ = self.send(step).await;
    }
}

/// Adapts a plain closure into an observer.
pub struct FnObserver<F>(pub F);

#[async_trait]
impl<F> StepObserver for FnObserver<F>
where
    F: Fn(AgentStep) + Send + Sync,
{
    async fn on_step(&self, step: AgentStep) {
        (self.0)(step)
    }
}

/// A reserved position in the trace.
#[derive(Debug, Clone)]
pub struct StepSlot {
    pub id: String,
    pub step_number: u32,
}

/// Numbers steps and forwards them to the observer.
pub struct StepEmitter {
    observer: Arc<dyn StepObserver>,
    last_number: u32,
}

impl StepEmitter {
    pub fn new(observer: Arc<dyn StepObserver>) -> Self {
        Self {
            observer,
            last_number: 0,
        }
    }

    /// Reserve the next step number without publishing anything yet.
    pub fn reserve(&mut self) -> StepSlot {
        self.last_number += 1;
        StepSlot {
            id: uuid::Uuid::new_v4().to_string(),
            step_number: self.last_number,
        }
    }

    /// Publish (or re-publish) a step under a reserved slot.
    pub async fn publish(
        &self,
        slot: &StepSlot,
        kind: AgentStepKind,
        content: impl Into<String>,
        title: Option<String>,
    ) -> AgentStep {
        let step = AgentStep {
            id: slot.id.clone(),
            step_number: slot.step_number,
            kind,
            content: content.into(),
            title,
            timestamp: Utc::now(),
        };
        self.observer.on_step(step.clone()).await;
        step
    }

    /// Reserve a slot and publish into it.
    pub async fn emit(
        &mut self,
        kind: AgentStepKind,
        content: impl Into<String>,
        title: Option<String>,
    ) -> AgentStep {
        let slot = self.reserve();
        self.publish(&slot, kind, content, title).await
    }

    /// Number of slots reserved so far.
    pub fn steps_taken(&self) -> u32 {
        self.last_number
    }
}
