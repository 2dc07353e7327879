//! Reduces a context's event stream into the current task snapshot and
//! persists every change through the task store.
//!
//! Reduction is idempotent on `messageId` and `artifactId`: the broker may
//! redeliver, and several instances may reduce the same stream.

use std::sync::Arc;
use tracing::warn;

use taskloom_types::{
    Message, SendMessageResult, StreamEvent, Task, TaskArtifactUpdateEvent,
};

use crate::errors::ServerResult;
use crate::task::TaskStore;

/// Folds [`StreamEvent`]s into a task snapshot.
pub struct ResultManager {
    store: Arc<dyn TaskStore>,
    current_task: Option<Task>,
    latest_user_message: Option<Message>,
    final_message: Option<Message>,
}

impl ResultManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            current_task: None,
            latest_user_message: None,
            final_message: None,
        }
    }

    /// Record the user message that initiated this exchange; it is prepended
    /// to a task's history when the task event arrives without it.
    pub fn set_user_message(&mut self, message: Message) {
        self.latest_user_message = Some(message);
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    /// The final outcome: a direct message when one ended the stream,
    /// otherwise the reduced task.
    pub fn result(&self) -> Option<SendMessageResult> {
        if let Some(message) = &self.final_message {
            return Some(SendMessageResult::Message(message.clone()));
        }
        self.current_task
            .as_ref()
            .map(|task| SendMessageResult::Task(task.clone()))
    }

    /// Apply one event to the snapshot and persist the change.
    pub async fn process(&mut self, event: &StreamEvent) -> ServerResult<()> {
        match event {
            StreamEvent::Message(message) => {
                // A standalone message is the result itself; the task, if
                // any, stops evolving here.
                self.final_message = Some(message.clone());
            }
            StreamEvent::Task(task) => {
                let mut task = task.clone();
                if let Some(user) = &self.latest_user_message {
                    if !task.history_contains(&user.message_id) {
                        task.history.insert(0, user.clone());
                    }
                }
                self.persist(task).await;
            }
            StreamEvent::StatusUpdate(update) => {
                let Some(mut task) = self.task_for(&update.task_id).await else {
                    warn!(task_id = %update.task_id, "status update for unknown task dropped");
                    return Ok(());
                };
                task.status = update.status.clone();
                if let Some(message) = &update.status.message {
                    if !task.history_contains(&message.message_id) {
                        task.history.push(message.clone());
                    }
                }
                self.persist(task).await;
            }
            StreamEvent::ArtifactUpdate(update) => {
                let Some(mut task) = self.task_for(&update.task_id).await else {
                    warn!(task_id = %update.task_id, "artifact update for unknown task dropped");
                    return Ok(());
                };
                apply_artifact_update(&mut task, update);
                self.persist(task).await;
            }
        }
        Ok(())
    }

    async fn task_for(&mut self, task_id: &str) -> Option<Task> {
        match self.current_task.take() {
            Some(task) if task.id == task_id => Some(task),
            other => {
                self.current_task = other;
                self.store.load(task_id).await
            }
        }
    }

    async fn persist(&mut self, task: Task) {
        self.store.save(&task, None).await;
        self.current_task = Some(task);
    }
}

/// Merge an artifact update into the task: append concatenates parts and
/// folds in name, description and metadata (new keys win); non-append
/// replaces; an unknown artifact is inserted.
fn apply_artifact_update(task: &mut Task, update: &TaskArtifactUpdateEvent) {
    let incoming = &update.artifact;
    match task
        .artifacts
        .iter_mut()
        .find(|a| a.artifact_id == incoming.artifact_id)
    {
        Some(existing) if update.append == Some(true) => {
            existing.parts.extend(incoming.parts.iter().cloned());
            if let Some(name) = &incoming.name {
                existing.name = Some(name.clone());
            }
            if let Some(description) = &incoming.description {
                existing.description = Some(description.clone());
            }
            if let Some(metadata) = &incoming.metadata {
                existing
                    .metadata
                    .get_or_insert_with(Default::default)
                    .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Some(existing) => *existing = incoming.clone(),
        None => task.artifacts.push(incoming.clone()),
    }
}
