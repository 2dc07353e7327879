//! Mediates between an opaque user handler and the event pipeline.
//!
//! The executor owns the task lifecycle events: it synthesizes or reuses the
//! task, announces it, drives the handler, translates the handler's return
//! shape into a terminal status, and publishes the final update. Handler
//! failures terminate the task with a `failed` status; `execute` itself
//! never fails.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use taskloom_types::{
    Artifact, Message, Metadata, Part, StreamEvent, Task, TaskState, TaskStatus,
    TaskStatusUpdateEvent, STATUS_UPDATE_KIND, TASK_KIND,
};

use crate::errors::{ServerError, ServerResult};
use crate::events::EventBus;

/// Role of the agent; carried as metadata only, no behavioral difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Worker,
    Supervisor,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Worker => "worker",
            AgentKind::Supervisor => "supervisor",
        }
    }
}

/// Identity stamped into task and status-update metadata.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub name: String,
    pub id: String,
    pub kind: AgentKind,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4().to_string(),
            kind,
        }
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            (
                "agentName".to_string(),
                serde_json::Value::String(self.name.clone()),
            ),
            (
                "agentId".to_string(),
                serde_json::Value::String(self.id.clone()),
            ),
            (
                "agentType".to_string(),
                serde_json::Value::String(self.kind.as_str().to_string()),
            ),
        ])
    }
}

/// Error type handlers may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Content-plus-artifacts reply shape.
#[derive(Debug, Clone, Default)]
pub struct PartsReply {
    pub parts: Vec<Part>,
    pub artifacts: Vec<Artifact>,
    pub metadata: Option<Metadata>,
}

/// Full-control reply shape: shallow-merged over the task. The status must
/// carry both a state and a message.
#[derive(Debug, Clone)]
pub struct TaskPatch {
    pub status: TaskStatus,
    pub artifacts: Option<Vec<Artifact>>,
    pub metadata: Option<Metadata>,
}

/// What a handler may return.
#[derive(Debug, Clone)]
pub enum HandlerResult {
    /// A plain string becomes a single text part of the agent's reply.
    Text(String),
    /// Content parts plus optional artifacts to attach.
    Parts(PartsReply),
    /// Full control over the completed task.
    Task(TaskPatch),
}

impl From<String> for HandlerResult {
    fn from(text: String) -> Self {
        HandlerResult::Text(text)
    }
}

impl From<&str> for HandlerResult {
    fn from(text: &str) -> Self {
        HandlerResult::Text(text.to_string())
    }
}

/// Publishes intermediate progress updates on behalf of a running handler.
/// Each call emits exactly one non-final `working` status update.
#[derive(Clone)]
pub struct UpdatePublisher {
    bus: EventBus,
    task_id: String,
    context_id: String,
    base_message: Message,
}

impl UpdatePublisher {
    pub async fn progress(&self, text: impl Into<String>) -> ServerResult<()> {
        let mut message = self.base_message.clone();
        message.parts = vec![Part::text(text)];
        let update = TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus {
                state: TaskState::Working,
                message: Some(message),
                timestamp: Some(Utc::now().to_rfc3339()),
            },
            is_final: false,
            metadata: None,
        };
        self.bus.publish(&StreamEvent::StatusUpdate(update)).await
    }
}

/// Everything a handler sees besides the message itself.
pub struct ExecutionContext {
    /// Snapshot of the task as it stood when the handler was invoked.
    pub task: Task,
    /// Channel for surfacing progress to subscribers.
    pub updates: UpdatePublisher,
}

/// The user-supplied agent logic.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        message: Message,
        context: ExecutionContext,
    ) -> Result<HandlerResult, HandlerError>;
}

/// Runs a handler against a message and publishes the task's lifecycle
/// events on the bus.
pub struct TaskExecutor {
    bus: EventBus,
    identity: AgentIdentity,
    handler: Arc<dyn TaskHandler>,
}

impl TaskExecutor {
    pub fn new(bus: EventBus, identity: AgentIdentity, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            bus,
            identity,
            handler,
        }
    }

    /// Drive one message through the handler. Failures never propagate out;
    /// they terminate the task with a `failed` status instead.
    pub async fn execute(&self, message: Message, existing: Option<Task>) {
        let is_new = existing.is_none();
        let mut task = match existing {
            Some(task) => task,
            None => self.new_task(&message),
        };
        if !task.history_contains(&message.message_id) {
            task.history.push(message.clone());
        }

        if is_new {
            self.publish_logged(StreamEvent::Task(task.clone())).await;
        }

        let working = TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            status: TaskStatus {
                state: TaskState::Working,
                message: Some(message.clone()),
                timestamp: Some(Utc::now().to_rfc3339()),
            },
            is_final: false,
            metadata: Some(self.identity.metadata()),
        };
        self.publish_logged(StreamEvent::StatusUpdate(working)).await;

        let context = ExecutionContext {
            task: task.clone(),
            updates: UpdatePublisher {
                bus: self.bus.clone(),
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                base_message: message.clone(),
            },
        };

        let status = match self.handler.handle(message.clone(), context).await {
            Ok(result) => match apply_result(&mut task, &message, result) {
                Ok(status) => status,
                Err(err) => failed_status(&mut task, &err.to_string()),
            },
            Err(err) => {
                error!(task_id = %task.id, error = %err, "handler failed");
                failed_status(&mut task, &err.to_string())
            }
        };

        debug!(task_id = %task.id, state = ?status.state, "task reached terminal state");
        let final_update = TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            status,
            is_final: true,
            metadata: Some(self.identity.metadata()),
        };
        self.publish_logged(StreamEvent::StatusUpdate(final_update))
            .await;
    }

    fn new_task(&self, message: &Message) -> Task {
        let id = message
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let context_id = message
            .context_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut metadata = message.metadata.clone().unwrap_or_default();
        metadata.extend(self.identity.metadata());

        Task {
            kind: TASK_KIND.to_string(),
            id,
            context_id,
            status: TaskStatus {
                state: TaskState::Submitted,
                message: Some(message.clone()),
                timestamp: Some(Utc::now().to_rfc3339()),
            },
            history: vec![message.clone()],
            artifacts: Vec::new(),
            metadata: Some(metadata),
        }
    }

    async fn publish_logged(&self, event: StreamEvent) {
        if let Err(err) = self.bus.publish(&event).await {
            error!(error = %err, "failed to publish lifecycle event");
        }
    }
}

/// Translate the handler's return shape into the terminal status, updating
/// the task's artifacts, metadata and history along the way.
fn apply_result(
    task: &mut Task,
    original: &Message,
    result: HandlerResult,
) -> ServerResult<TaskStatus> {
    let status = match result {
        HandlerResult::Text(text) => {
            let mut reply = original.clone();
            reply.parts = vec![Part::text(text)];
            TaskStatus {
                state: TaskState::Completed,
                message: Some(reply),
                timestamp: Some(Utc::now().to_rfc3339()),
            }
        }
        HandlerResult::Parts(parts_reply) => {
            for artifact in parts_reply.artifacts {
                merge_artifact(task, artifact);
            }
            if let Some(metadata) = parts_reply.metadata {
                task.metadata
                    .get_or_insert_with(Default::default)
                    .extend(metadata);
            }
            let mut reply = original.clone();
            reply.parts = parts_reply.parts;
            TaskStatus {
                state: TaskState::Completed,
                message: Some(reply),
                timestamp: Some(Utc::now().to_rfc3339()),
            }
        }
        HandlerResult::Task(patch) => {
            if patch.status.message.is_none() {
                return Err(ServerError::Internal(
                    "task result requires a status message".to_string(),
                ));
            }
            if let Some(artifacts) = patch.artifacts {
                task.artifacts = artifacts;
            }
            if let Some(metadata) = patch.metadata {
                task.metadata
                    .get_or_insert_with(Default::default)
                    .extend(metadata);
            }
            let mut status = patch.status;
            if status.timestamp.is_none() {
                status.timestamp = Some(Utc::now().to_rfc3339());
            }
            status
        }
    };

    if !task.history_contains(&original.message_id) {
        task.history.push(original.clone());
    }
    task.status = status.clone();
    Ok(status)
}

fn merge_artifact(task: &mut Task, artifact: Artifact) {
    match task
        .artifacts
        .iter_mut()
        .find(|a| a.artifact_id == artifact.artifact_id)
    {
        Some(existing) => *existing = artifact,
        None => task.artifacts.push(artifact),
    }
}

fn failed_status(task: &mut Task, reason: &str) -> TaskStatus {
    let note = Message::agent(
        Uuid::new_v4().to_string(),
        vec![Part::text(format!("Agent execution failed: {reason}"))],
    )
    .with_context_id(task.context_id.clone())
    .with_task_id(task.id.clone());
    task.history.push(note.clone());
    let status = TaskStatus {
        state: TaskState::Failed,
        message: Some(note),
        timestamp: Some(Utc::now().to_rfc3339()),
    };
    task.status = status.clone();
    status
}
