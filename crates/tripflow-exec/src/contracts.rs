use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use tripflow_core::tool_registry::ToolId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub trip_id: String,
    pub tool: ToolId,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub tool_name: String,
    pub message: String,
}

impl ToolError {
    pub fn new(tool: ToolId, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool.as_str().to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} failed: {}", self.tool_name, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Execution seam. The runner never cares whether results come from live
/// providers or canned fixtures.
pub trait ToolHandler {
    fn call(&self, invocation: &ToolInvocation) -> Result<Value, ToolError>;
}
