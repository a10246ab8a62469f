//! A2A wire types — tasks, messages, artifacts, agent cards, JSON-RPC.
//!
//! All types serialize as camelCase JSON matching the server's wire format.
//! Every snapshot type derives `Clone` and `PartialEq`: cloning is the
//! explicit value-copy used for caller-facing snapshots, and structural
//! equality is what the diff engine in [`crate::store`] compares with.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// The lifecycle state of a task, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task has been received but not yet started.
    Submitted,
    /// Task is actively being processed.
    Working,
    /// Task is paused waiting for input from the caller.
    InputRequired,
    /// Task completed successfully. Terminal.
    Completed,
    /// Task was canceled. Terminal.
    Canceled,
    /// Task failed. Terminal.
    Failed,
    /// Forward-compat catch-all for states this client does not know.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// `completed`, `canceled` and `failed` are terminal: the task will never
    /// change again and the client has nothing left to observe.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed
        )
    }

    /// Active states are everything that is neither terminal nor paused on
    /// the caller — the client keeps its update channel running for them.
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != TaskState::InputRequired
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
            TaskState::Failed => "failed",
            TaskState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user / client.
    User,
    /// Message from the agent / server.
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

// ============================================================================
// Core Task Types
// ============================================================================

/// Current status of a task: state plus an optional prompt message and
/// server-side timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// The current state.
    pub state: TaskState,

    /// Optional message associated with this status (e.g. the agent's
    /// question when the state is `input-required`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    /// ISO-8601 timestamp of when this status was set. Opaque to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    /// Build a status with just a state.
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: None,
        }
    }
}

/// A task — the server-managed unit of long-running work this client drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: String,

    /// Session the task belongs to, if the server groups tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Current task status.
    pub status: TaskStatus,

    /// Artifacts produced by the task, each keyed by its `index`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,

    /// Message history for this task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Message & Parts
// ============================================================================

/// A single message exchanged between caller and agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Who sent this message.
    pub role: Role,

    /// Ordered content parts. Order is significant for rendering.
    pub parts: Vec<Part>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Message {
    /// Build a user message containing a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

}

/// File content provided as base64-encoded bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWithBytes {
    /// Base64-encoded file content.
    pub bytes: String,
    /// MIME type of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// File content provided as a fetchable URI reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWithUri {
    /// URI pointing to the file content.
    pub uri: String,
    /// MIME type of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// File content — either inline bytes or a URI reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContent {
    /// File with inline base64-encoded bytes.
    Bytes(FileWithBytes),
    /// File referenced by URI.
    Uri(FileWithUri),
}

/// A content part within a message or artifact, discriminated by `type`.
///
/// JSON wire format:
/// - Text: `{"type": "text", "text": "hello"}`
/// - File: `{"type": "file", "file": {"uri": "https://...", "mimeType": "application/pdf"}}`
/// - Data: `{"type": "data", "data": {"key": "value"}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    /// A text content part. Discriminator: `"text"`.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
        /// Optional metadata associated with this part.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// A file content part. Discriminator: `"file"`.
    #[serde(rename = "file")]
    File {
        /// The file content (bytes or URI).
        file: FileContent,
        /// Optional metadata associated with this part.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// A structured data content part. Discriminator: `"data"`.
    #[serde(rename = "data")]
    Data {
        /// Arbitrary structured data.
        data: serde_json::Value,
        /// Optional metadata associated with this part.
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
}

impl Part {
    /// Build a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    /// Build a data part.
    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }
}

/// An indexed, independently-updatable output fragment of a task.
///
/// Identity within a task is the server-assigned `index`; artifacts are
/// always looked up and merged by index, never by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Description of the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered content parts of the artifact.
    pub parts: Vec<Part>,

    /// Stable identity of this artifact within its task.
    #[serde(default)]
    pub index: u32,

    /// Whether this update extends a prior artifact rather than replacing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,

    /// Whether this is the last chunk of the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,

    /// ISO-8601 timestamp. Opaque to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Agent Card
// ============================================================================

/// Static capability descriptor published by the agent at
/// `/.well-known/agent.json`. Immutable after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Human-readable agent name.
    pub name: String,

    /// The agent's JSON-RPC endpoint URL.
    pub url: String,

    /// Agent version string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Description of what the agent does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared capabilities — `streaming` drives strategy selection.
    #[serde(default)]
    pub capabilities: AgentCapabilities,

    /// Authentication schemes the agent accepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AgentAuthentication>,

    /// Input content types the agent accepts by default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_input_modes: Vec<String>,

    /// Output content types the agent produces by default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_output_modes: Vec<String>,
}

/// Capability flags declared in an agent card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Whether the agent supports `tasks/sendSubscribe` / `tasks/resubscribe`
    /// SSE streaming.
    #[serde(default)]
    pub streaming: bool,

    /// Whether the agent supports push notifications.
    #[serde(default)]
    pub push_notifications: bool,

    /// Whether the agent exposes task state transition history.
    #[serde(default)]
    pub state_transition_history: bool,
}

/// Authentication requirements declared in an agent card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthentication {
    /// Accepted scheme names (e.g. `"bearer"`).
    pub schemes: Vec<String>,

    /// Optional credential hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

// ============================================================================
// JSON-RPC Envelope
// ============================================================================

/// JSON-RPC request/response ID — string or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// String ID.
    String(String),
    /// Numeric ID.
    Number(i64),
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::String(s) => write!(f, "{}", s),
            JsonRpcId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Request ID.
    pub id: JsonRpcId,

    /// Method name (e.g. `tasks/send`).
    pub method: String,

    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// ID of the request this responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,

    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ============================================================================
// RPC Params
// ============================================================================

/// Parameters for `tasks/send` and `tasks/sendSubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSendParams {
    /// Task identifier (client-generated on first send).
    pub id: String,

    /// Session to attach the task to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// The message to send.
    pub message: Message,

    /// How much history to include in returned snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_length: Option<u32>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Parameters for `tasks/get` and `tasks/resubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueryParams {
    /// Task identifier.
    pub id: String,

    /// How much history to include in the returned snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_length: Option<u32>,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Parameters for `tasks/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    /// Task identifier.
    pub id: String,

    /// Arbitrary metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// Inbound Stream Frames
// ============================================================================

/// One decoded SSE event payload.
///
/// Inbound frames are signals, not state: the orchestrator only inspects
/// which fields are present and the `final` flag, then performs an
/// authoritative `tasks/get`. The payloads are therefore kept as raw JSON
/// and never applied to the task snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    /// Present when the frame signals a status change.
    #[serde(default)]
    pub status: Option<serde_json::Value>,

    /// Present when the frame signals an artifact change.
    #[serde(default)]
    pub artifact: Option<serde_json::Value>,

    /// Signals that the server is ending this stream segment.
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

impl StreamFrame {
    /// True when the frame signals that status or an artifact may have
    /// changed and an authoritative fetch is warranted.
    pub fn signals_change(&self) -> bool {
        self.status.is_some() || self.artifact.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InputRequired).unwrap(),
            "\"input-required\""
        );
        let state: TaskState = serde_json::from_str("\"working\"").unwrap();
        assert_eq!(state, TaskState::Working);
    }

    #[test]
    fn unknown_task_state_is_forward_compatible() {
        let state: TaskState = serde_json::from_str("\"rejected\"").unwrap();
        assert_eq!(state, TaskState::Unknown);
        assert!(!state.is_terminal());
        assert!(state.is_active());
    }

    #[test]
    fn terminal_and_active_partition() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Working.is_active());
        assert!(TaskState::Submitted.is_active());
        assert!(!TaskState::InputRequired.is_active());
        assert!(!TaskState::InputRequired.is_terminal());
    }

    #[test]
    fn part_round_trips_with_type_tag() {
        let part = Part::text("hello");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");

        let back: Part = serde_json::from_value(json).unwrap();
        assert_eq!(back, part);

        let part = Part::data(serde_json::json!({"units": 3}));
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["data"]["units"], 3);
    }

    #[test]
    fn file_part_distinguishes_bytes_and_uri() {
        let uri: Part = serde_json::from_value(serde_json::json!({
            "type": "file",
            "file": {"uri": "https://example.com/report.pdf", "mimeType": "application/pdf"}
        }))
        .unwrap();
        match uri {
            Part::File {
                file: FileContent::Uri(f),
                ..
            } => assert_eq!(f.uri, "https://example.com/report.pdf"),
            other => panic!("expected uri file part, got {:?}", other),
        }

        let bytes: Part = serde_json::from_value(serde_json::json!({
            "type": "file",
            "file": {"bytes": "SGVsbG8=", "name": "hello.txt"}
        }))
        .unwrap();
        match bytes {
            Part::File {
                file: FileContent::Bytes(f),
                ..
            } => assert_eq!(f.bytes, "SGVsbG8="),
            other => panic!("expected bytes file part, got {:?}", other),
        }
    }

    #[test]
    fn artifact_index_defaults_to_zero() {
        let artifact: Artifact = serde_json::from_value(serde_json::json!({
            "parts": [{"type": "text", "text": "chunk"}]
        }))
        .unwrap();
        assert_eq!(artifact.index, 0);
    }

    #[test]
    fn agent_card_minimal_parse() {
        let card: AgentCard = serde_json::from_value(serde_json::json!({
            "name": "Test Agent",
            "url": "http://localhost:7420/a2a",
            "capabilities": {"streaming": true},
            "authentication": {"schemes": ["bearer"]}
        }))
        .unwrap();
        assert!(card.capabilities.streaming);
        assert_eq!(card.authentication.unwrap().schemes, vec!["bearer"]);
    }

    #[test]
    fn stream_frame_classifies_by_shape() {
        let status: StreamFrame =
            serde_json::from_value(serde_json::json!({"status": {"state": "working"}})).unwrap();
        assert!(status.signals_change());
        assert!(!status.is_final);

        let fin: StreamFrame = serde_json::from_value(
            serde_json::json!({"status": {"state": "completed"}, "final": true}),
        )
        .unwrap();
        assert!(fin.is_final);

        let empty: StreamFrame = serde_json::from_value(serde_json::json!({"ping": 1})).unwrap();
        assert!(!empty.signals_change());
    }
}
