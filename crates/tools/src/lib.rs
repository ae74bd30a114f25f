//! Built-in tool implementations for stepwise.
//!
//! Small, side-effect-free tools that are safe to hand to any agent run:
//! arithmetic and the current time. Hosts register their own tools next to
//! these on the shared [`ToolRegistry`].

pub mod calculator;
pub mod current_time;

use std::sync::Arc;
use stepwise_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use current_time::CurrentTimeTool;

/// Create a default tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(CurrentTimeTool));
    tracing::debug!(tools = ?registry.names(), "Built default tool registry");
    registry
}
