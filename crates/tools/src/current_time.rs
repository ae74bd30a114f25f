//! Current time tool: reports the wall-clock time in UTC.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use stepwise_core::error::ToolError;
use stepwise_core::tool::{InvocationContext, Tool};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC (RFC 3339). Input is ignored."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _input: &str,
        _context: Option<&InvocationContext>,
    ) -> Result<String, ToolError> {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}
