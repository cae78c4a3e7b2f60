//! Capability descriptors advertised by a tool server
//!
//! Immutable, read-only snapshots fetched during the handshake and
//! refreshed wholesale on each successful connect; never partially
//! mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One callable tool advertised via `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON schema describing the tool's arguments
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One readable resource advertised via `resources/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One prompt template advertised via `prompts/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A typed argument accepted by a prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,
}

/// Everything a connected server advertises, written once per handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub prompts: Vec<PromptInfo>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_info_reads_camel_case_schema() {
        let json = r#"{
            "name": "echo_text",
            "description": "Echo text back",
            "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
        }"#;
        let tool: ToolInfo = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "echo_text");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_info_tolerates_missing_optional_fields() {
        let tool: ToolInfo = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert!(tool.description.is_none());
        assert!(tool.input_schema.is_null());
    }

    #[test]
    fn test_resource_info_reads_mime_type() {
        let json = r#"{"uri": "file:///readme", "name": "readme", "mimeType": "text/plain"}"#;
        let resource: ResourceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(resource.uri, "file:///readme");
        assert_eq!(resource.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_prompt_info_reads_typed_arguments() {
        let json = r#"{
            "name": "summarize",
            "arguments": [
                {"name": "text", "required": true},
                {"name": "style"}
            ]
        }"#;
        let prompt: PromptInfo = serde_json::from_str(json).unwrap();
        assert_eq!(prompt.arguments.len(), 2);
        assert!(prompt.arguments[0].required);
        assert!(!prompt.arguments[1].required);
    }
}
