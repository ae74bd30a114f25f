//! Tool dispatch for a single run.
//!
//! The dispatcher only executes tools that are both registered and enabled
//! for the run. A call to anything else is fatal to the run; a tool that
//! fails while executing is not, and the loop reports the failure back to
//! the model as an observation.

use std::sync::Arc;
use std::time::Instant;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{InvocationContext, ToolCall, ToolRegistry};
use tracing::{debug, warn};

/// Why a dispatch did not produce an observation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Not registered, or not enabled for this run.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The tool ran and failed.
    #[error("{}", failure_message(.0))]
    Failed(ToolError),
}

/// The message a tool failure is reported with.
pub fn failure_message(err: &ToolError) -> String {
    match err {
        ToolError::ExecutionFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    enabled: Vec<String>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, enabled: Vec<String>) -> Self {
        Self { registry, enabled }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|n| n == name)
    }

    /// Execute one tool call.
    pub async fn execute(
        &self,
        call: &ToolCall,
        context: Option<&InvocationContext>,
    ) -> Result<String, DispatchError> {
        if !self.is_enabled(&call.tool) {
            warn!(tool = %call.tool, "Model called a tool that is not enabled");
            return Err(DispatchError::NotFound(call.tool.clone()));
        }
        let tool = self
            .registry
            .get(&call.tool)
            .ok_or_else(|| DispatchError::NotFound(call.tool.clone()))?;

        debug!(tool = %call.tool, input = %call.input, "Executing tool");
        let start = Instant::now();
        let result = tool.execute(&call.input, context).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                debug!(tool = %call.tool, duration_ms, "Tool succeeded");
                Ok(output)
            }
            Err(e) => {
                warn!(tool = %call.tool, duration_ms, error = %e, "Tool failed");
                Err(DispatchError::Failed(e))
            }
        }
    }
}
