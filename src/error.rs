//! Error types for the Ouster MCP server.
//!
//! Tool failures are reported in-band: every outcome that reaches the
//! transport is a JSON record with a `status` tag, and failures carry
//! `is_error: true` in the CallToolResult. Protocol errors (unknown tool,
//! malformed arguments) are still handled by rmcp.

use crate::registry::RegistryError;
use rmcp::model::{CallToolResult, Content};
use serde_json::json;
use thiserror::Error;

/// Failures reported by a sensor SDK backend.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("failed to connect to sensor {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to read sensor metadata: {0}")]
    Metadata(String),

    #[error("failed to read scan: {0}")]
    Scan(String),

    #[error("sensor handle is closed")]
    Closed,

    #[error("not supported by this sensor backend: {0}")]
    Unsupported(String),

    #[error("sensor HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SdkError {
    /// Whether the handle that produced this error can no longer be used.
    pub fn invalidates_handle(&self) -> bool {
        matches!(self, SdkError::Closed)
    }
}

/// Tool execution errors - rendered in-band as `{"status": "error", ...}`
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    Sdk(#[from] SdkError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("Error starting visualization: {0}")]
    Spawn(String),

    #[error("Visualization process exited immediately: {0}")]
    ExitedImmediately(String),

    #[error("Discovery command timed out after {0} seconds")]
    DiscoveryTimeout(u64),

    #[error("Failed to discover sensors: {0}")]
    DiscoveryFailed(String),

    #[error("Unrecognized discovery output: {0}")]
    DiscoveryParse(String),

    #[error("No scan data available from sensor")]
    NoScanData,

    #[error("Streaming failed after {captured} scans: {reason}")]
    Streaming { captured: usize, reason: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid tool name: {0}")]
    InvalidToolName(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        let body = json!({
            "status": "error",
            "error": self.to_string(),
        });
        CallToolResult::error(vec![Content::text(
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string()),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_handle_is_the_only_invalidating_error() {
        assert!(SdkError::Closed.invalidates_handle());
        assert!(!SdkError::Scan("timeout".to_string()).invalidates_handle());
        assert!(!SdkError::Unsupported("scans".to_string()).invalidates_handle());
    }

    #[test]
    fn tool_result_is_flagged_and_tagged() {
        let result = ToolError::DiscoveryTimeout(10).to_tool_result();
        assert_eq!(result.is_error, Some(true));
        let text = serde_json::to_string(&result.content).unwrap();
        assert!(text.contains("Discovery command timed out after 10 seconds"));
        assert!(text.contains("status"));
    }
}
