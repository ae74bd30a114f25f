//! Decision envelope decoding.
//!
//! The model answers every thought with a JSON envelope:
//!
//! ```json
//! {
//!   "reasoning": "why this step",
//!   "decision": {"type": "action", "tool": "calculator", "input": "2+2", "title": "Add"}
//! }
//! ```
//!
//! The envelope may be wrapped in prose or a code fence; the first balanced
//! object in the text is used. Anything that does not decode into a known
//! decision is handed back as `None`, and the loop treats the raw text as the
//! final answer.
//!
//! While a thought is still streaming, [`live_display`] extracts whatever
//! part of the reasoning (and final answer) has arrived so far.

use serde_json::Value;
use stepwise_core::tool::ToolCall;

/// What the model asked the loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentDirective {
    Plan(String),
    Reflection(String),
    Action(ToolCall),
    FinalAnswer(String),
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub directive: AgentDirective,
    pub title: Option<String>,
    pub reasoning: Option<String>,
}

/// The `decision.type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionType {
    Plan,
    Reflection,
    Action,
    FinalAnswer,
}

impl DecisionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(Self::Plan),
            "reflection" => Some(Self::Reflection),
            "action" => Some(Self::Action),
            "final_answer" => Some(Self::FinalAnswer),
            _ => None,
        }
    }
}

/// An envelope that names an action but cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("action decision has no tool name")]
    MissingTool,

    #[error("action decision for '{0}' has no input")]
    MissingInput(String),
}

/// Decode the first decision envelope found in `text`.
///
/// Returns `Ok(None)` when there is no usable envelope (no JSON object,
/// malformed JSON, unknown type, or a plan/reflection/final answer without
/// string content). Only a structurally broken action is an error.
pub fn decode_directive(text: &str) -> Result<Option<Decision>, DirectiveError> {
    let Some(object) = find_json_object(text) else {
        return Ok(None);
    };
    let Ok(envelope) = serde_json::from_str::<Value>(object) else {
        return Ok(None);
    };
    let Some(decision) = envelope.get("decision").and_then(Value::as_object) else {
        return Ok(None);
    };
    let Some(kind) = decision
        .get("type")
        .and_then(Value::as_str)
        .and_then(DecisionType::parse)
    else {
        return Ok(None);
    };

    let title = decision
        .get("title")
        .or_else(|| envelope.get("title"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let reasoning = envelope
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::to_string);
    let content = decision
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let directive = match (kind, content) {
        (DecisionType::Action, _) => {
            let tool = decision
                .get("tool")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(DirectiveError::MissingTool)?;
            let input = match decision.get("input") {
                None | Some(Value::Null) => {
                    return Err(DirectiveError::MissingInput(tool.to_string()));
                }
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            AgentDirective::Action(ToolCall::new(tool, input))
        }
        (DecisionType::Plan, Some(c)) => AgentDirective::Plan(c),
        (DecisionType::Reflection, Some(c)) => AgentDirective::Reflection(c),
        (DecisionType::FinalAnswer, Some(c)) => AgentDirective::FinalAnswer(c),
        (_, None) => return Ok(None),
    };

    Ok(Some(Decision {
        directive,
        title,
        reasoning,
    }))
}

/// The first balanced `{...}` in `text`, skipping braces inside JSON strings.
pub fn find_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A string value read from possibly-truncated JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialString {
    pub value: String,
    /// The closing quote has arrived.
    pub complete: bool,
}

/// Byte offset just past `"key":` for the first unescaped occurrence of the key.
fn value_offset(text: &str, key: &str) -> Option<usize> {
    let token = format!("\"{key}\"");
    let mut from = 0;
    while let Some(found) = text[from..].find(&token) {
        let at = from + found;
        from = at + token.len();
        if text[..at].ends_with('\\') {
            continue;
        }
        let rest = &text[from..];
        let trimmed = rest.trim_start();
        if let Some(after_colon) = trimmed.strip_prefix(':') {
            return Some(text.len() - after_colon.len());
        }
        if trimmed.is_empty() {
            return None;
        }
    }
    None
}

/// Read the string value of `key` out of JSON that may still be arriving.
///
/// Handles `\n`, `\t`, `\r`, `\"` and `\\`; any other escaped character is
/// kept as itself. A trailing lone backslash is held back until the next
/// character shows what it escapes.
pub fn partial_string_field(text: &str, key: &str) -> Option<PartialString> {
    let at = value_offset(text, key)?;
    let body = text[at..].trim_start().strip_prefix('"')?;

    let mut value = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                return Some(PartialString {
                    value,
                    complete: true,
                });
            }
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => break,
            },
            c => value.push(c),
        }
    }
    Some(PartialString {
        value,
        complete: false,
    })
}

/// The decision type of a streaming envelope, once its value is complete.
pub fn streamed_decision_type(text: &str) -> Option<DecisionType> {
    let scope = &text[value_offset(text, "decision")?..];
    let field = partial_string_field(scope, "type")?;
    if field.complete {
        DecisionType::parse(&field.value)
    } else {
        None
    }
}

/// Human-readable text for a thought that may still be streaming.
///
/// For an envelope this is the reasoning, followed by the final answer once
/// the decision is known to be one. Text that does not open with an envelope
/// shows whatever prose precedes the first `{`.
pub fn live_display(text: &str) -> String {
    const FENCE: &str = "```json";

    let body = text.trim_start();
    if FENCE.starts_with(body.trim_end()) {
        // Still inside the opening fence.
        return String::new();
    }
    let body = match body.strip_prefix(FENCE).or_else(|| body.strip_prefix("```")) {
        Some(rest) if rest.trim().is_empty() => return String::new(),
        Some(rest) => rest.trim_start(),
        None => body,
    };

    if body.starts_with('{') {
        let reasoning = partial_string_field(body, "reasoning")
            .map(|f| f.value)
            .unwrap_or_default();

        if streamed_decision_type(body) == Some(DecisionType::FinalAnswer) {
            let content = value_offset(body, "decision")
                .and_then(|at| partial_string_field(&body[at..], "content"))
                .map(|f| f.value)
                .unwrap_or_default();
            if !content.is_empty() {
                return if reasoning.is_empty() {
                    content
                } else {
                    format!("{reasoning}\n\n{content}")
                };
            }
        }
        return reasoning;
    }

    let prose = match text.find('{') {
        Some(at) => &text[..at],
        None => text,
    };
    prose.trim().trim_matches('`').trim().to_string()
}
