//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the stepwise agent runtime.
//! This crate has **no transport dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! The LLM transport and the tools are traits here. Implementations live in
//! their respective crates, which keeps the agent loop testable with scripted
//! providers and lets hosts plug in their own backends.

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, AgentStepType};
pub use error::{AgentError, Error, ProviderError, Result, ToolError};
pub use message::{ConversationId, FileAttachment, Message, Role};
pub use provider::{
    CallContext, CallSource, ChatRequest, ChatResponse, MessageDelta, Provider, RequestMetadata,
    StreamFragment, Usage,
};
pub use tool::{InvocationContext, Tool, ToolCall, ToolDefinition, ToolRegistry};
