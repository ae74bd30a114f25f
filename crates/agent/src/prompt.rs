//! System prompt construction for agent mode.

use stepwise_core::agent::{AgentConfig, AgentStepType};
use stepwise_core::tool::ToolDefinition;

const PROTOCOL: &str = "\
You work step by step. Every reply must be a single JSON object and nothing else:

{\"title\": \"<optional short label>\", \"reasoning\": \"<your thinking>\", \"decision\": {\"type\": \"<decision type>\", ...}}

Available decision types:";

const FINAL_ANSWER: &str = "- \"final_answer\": when you can answer the user, \
respond with {\"decision\": {\"type\": \"final_answer\", \"content\": \"<your answer>\"}}.";

const OBSERVATION_NOTE: &str = " Its result will be returned to you as an observation.";

/// Build the system prompt for one agent run.
///
/// Direct chat uses the caller's system prompt alone; agent mode appends the
/// decision protocol, one block per allowed step, the tool catalogue when
/// actions are allowed, and the final answer instruction.
pub fn build_system_prompt(config: &AgentConfig, tools: &[ToolDefinition]) -> Option<String> {
    if config.is_direct_chat() {
        return config.system_prompt.clone();
    }

    let mut sections: Vec<String> = Vec::new();
    if let Some(custom) = config.system_prompt.as_deref().map(str::trim)
        && !custom.is_empty()
    {
        sections.push(custom.to_string());
    }

    let mut protocol = String::from(PROTOCOL);
    for step in &config.allowed_steps {
        protocol.push('\n');
        protocol.push_str(step.instruction());
        if step.implies_observation() {
            protocol.push_str(OBSERVATION_NOTE);
        }
    }
    protocol.push('\n');
    protocol.push_str(FINAL_ANSWER);
    sections.push(protocol);

    if config.allows(AgentStepType::Action) {
        sections.push(tool_catalogue(tools));
    }

    Some(sections.join("\n\n"))
}

fn tool_catalogue(tools: &[ToolDefinition]) -> String {
    if tools.is_empty() {
        return "No tools are available.".into();
    }
    let mut out = String::from("Available tools:");
    for tool in tools {
        out.push_str(&format!(
            "\n- {}: {}\n  input schema: {}",
            tool.name, tool.description, tool.parameters
        ));
    }
    out
}
