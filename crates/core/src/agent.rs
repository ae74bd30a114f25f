//! Agent configuration and step types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Error;

/// Configuration for one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Step kinds the model may choose besides `final_answer`.
    /// Empty disables the decision protocol entirely (direct chat).
    #[serde(default)]
    pub allowed_steps: BTreeSet<AgentStepType>,

    /// Tools made available to the model, in prompt order
    #[serde(default)]
    pub tools: Vec<String>,

    /// Caller-supplied system prompt, prepended to the protocol instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Upper bound on loop iterations
    #[serde(default = "default_max_thoughts")]
    pub max_thoughts: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per model turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_max_thoughts() -> u32 {
    10
}
fn default_temperature() -> f32 {
    0.7
}

impl AgentConfig {
    /// A config that allows every step kind.
    pub fn with_all_steps() -> Self {
        Self {
            allowed_steps: AgentStepType::ALL.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Whether the decision protocol is bypassed.
    pub fn is_direct_chat(&self) -> bool {
        self.allowed_steps.is_empty()
    }

    pub fn allows(&self, step: AgentStepType) -> bool {
        self.allowed_steps.contains(&step)
    }

    /// Check the invariants every run relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_thoughts == 0 {
            return Err(Error::Config {
                message: "max_thoughts must be at least 1".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config {
                message: "temperature must be between 0.0 and 2.0".into(),
            });
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            allowed_steps: BTreeSet::new(),
            tools: Vec::new(),
            system_prompt: None,
            max_thoughts: default_max_thoughts(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A step kind the model may choose instead of answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStepType {
    Plan,
    Action,
    Reflection,
}

impl AgentStepType {
    pub const ALL: [AgentStepType; 3] = [Self::Plan, Self::Action, Self::Reflection];

    /// Wire name used in the decision envelope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Action => "action",
            Self::Reflection => "reflection",
        }
    }

    /// Instruction block injected into the prompt when this step is allowed.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Plan => {
                "- \"plan\": lay out the steps you intend to take before acting. \
                 Respond with {\"decision\": {\"type\": \"plan\", \"content\": \"<your plan>\"}}."
            }
            Self::Action => {
                "- \"action\": call exactly one of the available tools. \
                 Respond with {\"decision\": {\"type\": \"action\", \"tool\": \"<tool name>\", \"input\": <tool input>}}."
            }
            Self::Reflection => {
                "- \"reflection\": review what you have learned so far and correct course if needed. \
                 Respond with {\"decision\": {\"type\": \"reflection\", \"content\": \"<your reflection>\"}}."
            }
        }
    }

    /// Only actions produce an observation automatically.
    pub fn implies_observation(&self) -> bool {
        matches!(self, Self::Action)
    }
}

impl std::fmt::Display for AgentStepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
