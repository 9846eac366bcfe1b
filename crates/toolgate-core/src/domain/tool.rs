//! Tool descriptors and tool call results
//!
//! `ToolSpec` mirrors the MCP tool JSON shape (camelCase) so descriptors move
//! between the gateway and rmcp through plain serde round-trips.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name → value argument map passed to a tool call
pub type ToolArguments = Map<String, Value>;

/// Behavioural hints advertised with a tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

impl ToolHints {
    /// Hints for a tool that only reads state
    pub fn read_only() -> Self {
        Self {
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
            open_world_hint: Some(false),
            ..Default::default()
        }
    }

    pub fn with_destructive(mut self, destructive: bool) -> Self {
        self.destructive_hint = Some(destructive);
        self
    }

    pub fn with_open_world(mut self, open_world: bool) -> Self {
        self.open_world_hint = Some(open_world);
        self
    }
}

/// Immutable tool descriptor
///
/// The name is unique within one provider. Everything else is opaque to the
/// gateway and forwarded to clients as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolHints>,
}

fn empty_object_schema() -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(Map::new()));
    schema
}

impl ToolSpec {
    /// Create a tool that takes no arguments
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema: empty_object_schema(),
            output_schema: None,
            annotations: None,
        }
    }

    /// Replace the input schema. Non-object values are ignored.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        if let Value::Object(map) = schema {
            self.input_schema = map;
        }
        self
    }

    pub fn with_hints(mut self, hints: ToolHints) -> Self {
        self.annotations = Some(hints);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Convert any serde-compatible tool descriptor (e.g. `rmcp::model::Tool`)
    pub fn from_json<T: Serialize>(tool: &T) -> Option<Self> {
        serde_json::to_value(tool)
            .ok()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}

/// Uniform result value produced by every provider
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Structured value; strings are delivered to clients verbatim
    Json(Value),
    /// MIME-tagged binary payload
    Binary { mime_type: String, data: Vec<u8> },
    /// Several results from one call, delivered in order
    Multiple(Vec<ToolOutput>),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Json(Value::String(text.into()))
    }

    pub fn binary(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Binary {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Collapse a list: one item stays itself, zero items become `null`
    pub fn from_items(mut items: Vec<ToolOutput>) -> Self {
        match items.len() {
            0 => Self::Json(Value::Null),
            1 => items.remove(0),
            _ => Self::Multiple(items),
        }
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

/// Errors raised by a tool call
///
/// These never become transport faults: the session turns them into
/// error-flagged results for the calling client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error("{0}")]
    Remote(String),
    #[error("{0}")]
    Unavailable(String),
}
