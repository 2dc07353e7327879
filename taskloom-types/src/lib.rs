//! # A2A (Agent2Agent) Protocol Types
//!
//! Rust data structures for the Agent2Agent (A2A) task protocol as served by
//! the taskloom runtime: messages, tasks, artifacts, the streaming event
//! union, and the parameter types of the JSON-RPC methods. All types are
//! designed for serialization and deserialization with `serde` and use the
//! protocol's camelCase wire names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod agent_card;
pub use agent_card::{
    AgentCapabilities, AgentCard, AgentProvider, AgentSkill, AgentSummary,
};

/// Extension metadata attached to messages, tasks, parts and artifacts.
pub type Metadata = HashMap<String, serde_json::Value>;

// Discriminator values carried in the `kind` field of wire objects.
pub const TASK_KIND: &str = "task";
pub const MESSAGE_KIND: &str = "message";
pub const STATUS_UPDATE_KIND: &str = "status-update";
pub const ARTIFACT_UPDATE_KIND: &str = "artifact-update";

// ============================================================================
// Core Protocol Types
// ============================================================================

/// Defines the lifecycle states of a Task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// The task has been submitted and is awaiting execution.
    Submitted,
    /// The agent is actively working on the task.
    Working,
    /// The task is paused and waiting for input from the user.
    InputRequired,
    /// The task has been successfully completed.
    Completed,
    /// The task failed due to an error during execution.
    Failed,
    /// The task has been canceled by the user.
    Canceled,
    /// The task was rejected by the agent and was not started.
    Rejected,
}

impl TaskState {
    /// Whether this state ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }
}

/// Represents the status of a task at a specific point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatus {
    /// The current state of the task's lifecycle.
    pub state: TaskState,
    /// An optional, human-readable message providing more details about the current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// An ISO 8601 datetime string indicating when this status was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// A single, stateful operation between a client and an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// The type of this object, used as a discriminator. Always 'task'.
    #[serde(default = "default_task_kind")]
    pub kind: String,
    /// A unique identifier for the task, generated by the server for a new task.
    pub id: String,
    /// A server-generated identifier grouping related tasks and interactions.
    #[serde(rename = "contextId")]
    pub context_id: String,
    /// The current status of the task.
    pub status: TaskStatus,
    /// Messages exchanged during the task, in chronological order.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<Message>,
    /// Artifacts produced by the agent during execution.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_task_kind() -> String {
    TASK_KIND.to_string()
}

impl Task {
    /// Whether the task has already completed its lifecycle.
    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// Whether the task's history contains a message with the given id.
    pub fn history_contains(&self, message_id: &str) -> bool {
        self.history.iter().any(|m| m.message_id == message_id)
    }
}

/// Identifies the sender of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// For messages sent by the client/user.
    User,
    /// For messages sent by the agent/service.
    Agent,
}

/// A single message in the conversation between a user and an agent.
/// Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The type of this object, used as a discriminator. Always 'message'.
    #[serde(default = "default_message_kind")]
    pub kind: String,
    /// A unique identifier for the message, generated by the sender.
    #[serde(rename = "messageId")]
    pub message_id: String,
    /// Identifies the sender of the message.
    pub role: MessageRole,
    /// The content parts that form the message body.
    pub parts: Vec<Part>,
    /// The context identifier for this message.
    #[serde(skip_serializing_if = "Option::is_none", rename = "contextId")]
    pub context_id: Option<String>,
    /// The task this message belongs to. Omitted for the first message of a new task.
    #[serde(skip_serializing_if = "Option::is_none", rename = "taskId")]
    pub task_id: Option<String>,
    /// Optional metadata for extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_message_kind() -> String {
    MESSAGE_KIND.to_string()
}

impl Message {
    /// Create a user message with a fresh role and the given id and parts.
    pub fn user(message_id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self::new(message_id, MessageRole::User, parts)
    }

    /// Create an agent message with the given id and parts.
    pub fn agent(message_id: impl Into<String>, parts: Vec<Part>) -> Self {
        Self::new(message_id, MessageRole::Agent, parts)
    }

    fn new(message_id: impl Into<String>, role: MessageRole, parts: Vec<Part>) -> Self {
        Self {
            kind: default_message_kind(),
            message_id: message_id.into(),
            role,
            parts,
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A discriminated union representing a part of a message or artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// A text segment.
    Text {
        /// The string content of the text part.
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    /// A file segment.
    File {
        /// The file content, as either a URI or base64-encoded bytes.
        file: FileContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
    /// A structured data segment.
    Data {
        /// The structured data content.
        data: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Metadata>,
    },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            metadata: None,
        }
    }

    /// Create a structured data part.
    pub fn data(data: serde_json::Value) -> Self {
        Part::Data {
            data,
            metadata: None,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Part::Text { metadata, .. }
            | Part::File { metadata, .. }
            | Part::Data { metadata, .. } => metadata.as_ref(),
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Option<Metadata> {
        match self {
            Part::Text { metadata, .. }
            | Part::File { metadata, .. }
            | Part::Data { metadata, .. } => metadata,
        }
    }
}

/// File content, provided either directly as bytes or as a URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileContent {
    WithBytes(FileWithBytes),
    WithUri(FileWithUri),
}

/// A file with its content provided directly as a base64-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileWithBytes {
    /// The base64-encoded content of the file.
    pub bytes: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A file with its content located at a specific URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileWithUri {
    /// A URL pointing to the file's content.
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A resource produced by an agent during a task, assembled from parts that
/// may arrive incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// A unique identifier for the artifact within the scope of the task.
    #[serde(rename = "artifactId")]
    pub artifact_id: String,
    /// The content parts that make up the artifact.
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

// ============================================================================
// Streaming Event Types
// ============================================================================

/// Notifies the client of a change in a task's status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStatusUpdateEvent {
    /// The type of this event. Always "status-update".
    #[serde(default = "default_status_update_kind")]
    pub kind: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    /// The new status of the task.
    pub status: TaskStatus,
    /// If true, this is the final event in the stream for this interaction.
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_status_update_kind() -> String {
    STATUS_UPDATE_KIND.to_string()
}

/// Notifies the client that an artifact has been generated or updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskArtifactUpdateEvent {
    /// The type of this event. Always "artifact-update".
    #[serde(default = "default_artifact_update_kind")]
    pub kind: String,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "contextId")]
    pub context_id: String,
    /// The artifact that was generated or updated.
    pub artifact: Artifact,
    /// If true, this artifact's parts should be appended to the previously
    /// sent artifact with the same id rather than replacing it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append: Option<bool>,
    /// If true, this is the final chunk of the artifact.
    #[serde(skip_serializing_if = "Option::is_none", rename = "lastChunk")]
    pub last_chunk: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

fn default_artifact_update_kind() -> String {
    ARTIFACT_UPDATE_KIND.to_string()
}

/// The event union published on a context's topic and delivered to stream
/// subscribers. Serialized untagged; the required fields of each variant
/// (`id` vs `messageId` vs `final` vs `artifact`) disambiguate on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StreamEvent {
    Task(Task),
    Message(Message),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl StreamEvent {
    /// The context this event belongs to, when it carries one.
    pub fn context_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Task(t) => Some(t.context_id.as_str()),
            StreamEvent::Message(m) => m.context_id.as_deref(),
            StreamEvent::StatusUpdate(u) => Some(u.context_id.as_str()),
            StreamEvent::ArtifactUpdate(u) => Some(u.context_id.as_str()),
        }
    }

    /// The task this event belongs to, when it carries one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Task(t) => Some(t.id.as_str()),
            StreamEvent::Message(m) => m.task_id.as_deref(),
            StreamEvent::StatusUpdate(u) => Some(u.task_id.as_str()),
            StreamEvent::ArtifactUpdate(u) => Some(u.task_id.as_str()),
        }
    }

    /// Whether this event terminates the interaction: a standalone message or
    /// a status update flagged final.
    pub fn ends_stream(&self) -> bool {
        match self {
            StreamEvent::Message(_) => true,
            StreamEvent::StatusUpdate(u) => u.is_final,
            _ => false,
        }
    }
}

/// The result of a `message/send` call: a task, or a direct message reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SendMessageResult {
    Task(Task),
    Message(Message),
}

// ============================================================================
// Method Parameter Types
// ============================================================================

/// Parameters for `message/send` and `message/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    /// The message being sent to the agent.
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Configuration options for a send request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageSendConfiguration {
    /// If true, the client will wait for the task to complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
    /// The number of most recent history entries to include in the response.
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
    /// Push notification setup to apply alongside the send.
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "pushNotificationConfig"
    )]
    pub push_notification_config: Option<PushNotificationConfig>,
}

/// Parameters containing a task id, used for simple task operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    /// The unique identifier of the task.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Parameters for querying a task, with an option to limit history length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryParams {
    /// The unique identifier of the task.
    pub id: String,
    /// The number of most recent history entries to retrieve.
    #[serde(skip_serializing_if = "Option::is_none", rename = "historyLength")]
    pub history_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// A caller-provided webhook descriptor, stored per task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotificationConfig {
    /// The callback URL where the agent should send push notifications.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// A token to validate incoming push notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<PushNotificationAuthenticationInfo>,
}

/// Authentication details for a push notification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotificationAuthenticationInfo {
    /// Supported authentication schemes (e.g. 'Basic', 'Bearer').
    pub schemes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// Associates a push notification configuration with a specific task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPushNotificationConfig {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "pushNotificationConfig")]
    pub push_notification_config: PushNotificationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_terminality() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Submitted.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
    }

    #[test]
    fn message_round_trip_uses_wire_names() {
        let message = Message::user("m1", vec![Part::text("hello")])
            .with_context_id("ctx-1")
            .with_task_id("t1");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["kind"], "message");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["contextId"], "ctx-1");
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["parts"][0]["kind"], "text");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn stream_event_discriminates_untagged() {
        let status = serde_json::json!({
            "kind": "status-update",
            "taskId": "t1",
            "contextId": "ctx-1",
            "status": { "state": "working" },
            "final": false,
        });
        let event: StreamEvent = serde_json::from_value(status).unwrap();
        assert!(matches!(event, StreamEvent::StatusUpdate(_)));
        assert!(!event.ends_stream());

        let artifact = serde_json::json!({
            "kind": "artifact-update",
            "taskId": "t1",
            "contextId": "ctx-1",
            "artifact": { "artifactId": "a1", "parts": [{ "kind": "text", "text": "x" }] },
            "append": true,
        });
        let event: StreamEvent = serde_json::from_value(artifact).unwrap();
        assert!(matches!(event, StreamEvent::ArtifactUpdate(_)));

        let task = serde_json::json!({
            "kind": "task",
            "id": "t1",
            "contextId": "ctx-1",
            "status": { "state": "submitted" },
        });
        let event: StreamEvent = serde_json::from_value(task).unwrap();
        assert!(matches!(event, StreamEvent::Task(_)));

        let message = serde_json::json!({
            "kind": "message",
            "messageId": "m1",
            "role": "agent",
            "parts": [],
        });
        let event: StreamEvent = serde_json::from_value(message).unwrap();
        assert!(matches!(event, StreamEvent::Message(_)));
        assert!(event.ends_stream());
    }

    #[test]
    fn final_status_update_ends_stream() {
        let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: "t1".to_string(),
            context_id: "ctx-1".to_string(),
            status: TaskStatus::new(TaskState::Completed),
            is_final: true,
            metadata: None,
        });
        assert!(event.ends_stream());
        assert_eq!(event.task_id(), Some("t1"));
        assert_eq!(event.context_id(), Some("ctx-1"));
    }

    #[test]
    fn file_content_accepts_bytes_or_uri() {
        let bytes = serde_json::json!({ "bytes": "aGVsbG8=", "mimeType": "text/plain" });
        let content: FileContent = serde_json::from_value(bytes).unwrap();
        assert!(matches!(content, FileContent::WithBytes(_)));

        let uri = serde_json::json!({ "uri": "https://example.com/report.pdf" });
        let content: FileContent = serde_json::from_value(uri).unwrap();
        assert!(matches!(content, FileContent::WithUri(_)));
    }
}
