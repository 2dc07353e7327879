//! The request handler composes the executor, bus, queues, result manager
//! and stores into the public operation surface behind the JSON-RPC methods.

use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use taskloom_types::{
    AgentCard, Message, MessageSendParams, Part, PushNotificationConfig, SendMessageResult,
    StreamEvent, Task, TaskIdParams, TaskPushNotificationConfig, TaskQueryParams, TaskState,
    TaskStatus, TaskStatusUpdateEvent, STATUS_UPDATE_KIND,
};

use crate::cache::{CacheService, CacheValue, SetOptions};
use crate::errors::{ServerError, ServerResult};
use crate::events::{EventBus, ExecutionEventQueue};
use crate::executor::TaskExecutor;
use crate::task::{ResultManager, TaskStore};

/// Deadline bounding a blocking `message/send`.
pub const SEND_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

const PUSH_CONFIG_KEY_PREFIX: &str = "push-config:";

/// Serves the A2A operations. Constructed with explicit collaborators; holds
/// no global state.
pub struct RequestHandler {
    agent_card: AgentCard,
    cache: Arc<dyn CacheService>,
    store: Arc<dyn TaskStore>,
    bus: EventBus,
    executor: Arc<TaskExecutor>,
}

impl RequestHandler {
    pub fn new(
        agent_card: AgentCard,
        cache: Arc<dyn CacheService>,
        store: Arc<dyn TaskStore>,
        bus: EventBus,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            agent_card,
            cache,
            store,
            bus,
            executor,
        }
    }

    pub fn agent_card(&self) -> &AgentCard {
        &self.agent_card
    }

    /// Blocking send: drives the task to its terminal event and returns the
    /// final task (or message). Bounded by [`SEND_MESSAGE_TIMEOUT`]; on
    /// deadline the queue is stopped, the handler task is aborted, and the
    /// call fails with an internal timeout error.
    pub async fn send_message(&self, params: MessageSendParams) -> ServerResult<SendMessageResult> {
        let (message, existing, context_id) = self.prepare_send(params).await?;

        let mut queue = ExecutionEventQueue::new(&self.bus, &context_id);
        let stop = queue.stop_handle();
        let mut manager = ResultManager::new(self.store.clone());
        manager.set_user_message(message.clone());

        let execution = self.spawn_executor(message, existing);

        let drive = async {
            while let Some(event) = queue.next_event().await {
                manager.process(&event).await?;
            }
            Ok::<(), ServerError>(())
        };

        match tokio::time::timeout(SEND_MESSAGE_TIMEOUT, drive).await {
            Err(_elapsed) => {
                stop.stop();
                execution.abort();
                Err(ServerError::Internal("Timeout".to_string()))
            }
            Ok(Err(err)) => {
                self.publish_failure(manager.current_task(), &err).await;
                Err(err)
            }
            Ok(Ok(())) => manager
                .result()
                .ok_or_else(|| ServerError::Internal("task produced no result".to_string())),
        }
    }

    /// Streaming send: yields each task, status-update and artifact-update
    /// event in arrival order while reducing them into the persisted
    /// snapshot. The stream ends after the terminal event; dropping it
    /// releases the subscription.
    pub async fn send_message_stream(
        &self,
        params: MessageSendParams,
    ) -> ServerResult<impl Stream<Item = ServerResult<StreamEvent>> + Send> {
        self.ensure_streaming()?;
        let (message, existing, context_id) = self.prepare_send(params).await?;

        let queue = ExecutionEventQueue::new(&self.bus, &context_id);
        let mut manager = ResultManager::new(self.store.clone());
        manager.set_user_message(message.clone());

        self.spawn_executor(message, existing);

        struct StreamState {
            queue: ExecutionEventQueue,
            manager: ResultManager,
            bus: EventBus,
            failed: bool,
        }

        let state = StreamState {
            queue,
            manager,
            bus: self.bus.clone(),
            failed: false,
        };

        Ok(futures::stream::unfold(state, |mut state| async move {
            if state.failed {
                return None;
            }
            let event = state.queue.next_event().await?;
            if let Err(err) = state.manager.process(&event).await {
                state.failed = true;
                publish_failure_on(&state.bus, state.manager.current_task(), &err).await;
                state.queue.stop_handle().stop();
                return Some((Err(err), state));
            }
            Some((Ok(event), state))
        }))
    }

    /// Fetch a task, optionally truncating history to the last N entries.
    pub async fn get_task(&self, params: TaskQueryParams) -> ServerResult<Task> {
        let mut task = self
            .store
            .load(&params.id)
            .await
            .ok_or_else(|| ServerError::TaskNotFound(params.id.clone()))?;
        if let Some(limit) = params.history_length {
            if limit >= 0 {
                let limit = limit as usize;
                if task.history.len() > limit {
                    let drop = task.history.len() - limit;
                    task.history.drain(..drop);
                }
            }
        }
        Ok(task)
    }

    /// Cancel a non-terminal task: persist the canceled status and publish
    /// the final status update so every subscriber observes it.
    pub async fn cancel_task(&self, params: TaskIdParams) -> ServerResult<Task> {
        let mut task = self
            .store
            .load(&params.id)
            .await
            .ok_or_else(|| ServerError::TaskNotFound(params.id.clone()))?;
        if task.is_terminal() {
            return Err(ServerError::TaskNotCancelable(params.id));
        }

        let note = Message::agent(
            Uuid::new_v4().to_string(),
            vec![Part::text("Task was canceled by the client.")],
        )
        .with_context_id(task.context_id.clone())
        .with_task_id(task.id.clone());

        task.status = TaskStatus {
            state: TaskState::Canceled,
            message: Some(note.clone()),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        };
        task.history.push(note);
        self.store.save(&task, None).await;

        let update = TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: task.id.clone(),
            context_id: task.context_id.clone(),
            status: task.status.clone(),
            is_final: true,
            metadata: None,
        };
        self.bus.publish(&StreamEvent::StatusUpdate(update)).await?;

        debug!(task_id = %task.id, "task canceled");
        Ok(task)
    }

    /// Store a push notification config for a task.
    pub async fn set_push_notification_config(
        &self,
        params: TaskPushNotificationConfig,
    ) -> ServerResult<TaskPushNotificationConfig> {
        self.ensure_push_notifications()?;
        self.store
            .load(&params.task_id)
            .await
            .ok_or_else(|| ServerError::TaskNotFound(params.task_id.clone()))?;

        let key = format!("{PUSH_CONFIG_KEY_PREFIX}{}", params.task_id);
        let value = serde_json::to_value(&params.push_notification_config)?;
        self.cache
            .set(&key, CacheValue::Json(value), SetOptions::default())
            .await?;
        Ok(params)
    }

    /// Fetch the stored push notification config for a task.
    pub async fn get_push_notification_config(
        &self,
        params: TaskIdParams,
    ) -> ServerResult<TaskPushNotificationConfig> {
        self.ensure_push_notifications()?;
        self.store
            .load(&params.id)
            .await
            .ok_or_else(|| ServerError::TaskNotFound(params.id.clone()))?;

        let key = format!("{PUSH_CONFIG_KEY_PREFIX}{}", params.id);
        let value = self.cache.get_json(&key).await?.ok_or_else(|| {
            ServerError::Internal(format!(
                "no push notification config stored for task {}",
                params.id
            ))
        })?;
        let config: PushNotificationConfig = serde_json::from_value(value)?;
        Ok(TaskPushNotificationConfig {
            task_id: params.id,
            push_notification_config: config,
        })
    }

    /// Re-attach to a running task: yields the task immediately, then its
    /// remaining events until termination. A terminal task yields only
    /// itself.
    pub async fn resubscribe(
        &self,
        params: TaskIdParams,
    ) -> ServerResult<impl Stream<Item = ServerResult<StreamEvent>> + Send> {
        self.ensure_streaming()?;
        let task = self
            .store
            .load(&params.id)
            .await
            .ok_or_else(|| ServerError::TaskNotFound(params.id.clone()))?;

        let queue = if task.is_terminal() {
            None
        } else {
            Some(ExecutionEventQueue::new(&self.bus, &task.context_id))
        };
        let task_id = task.id.clone();
        let first = StreamEvent::Task(task);

        let tail = futures::stream::unfold((queue, task_id), |(mut queue, task_id)| async move {
            let event = {
                let active = queue.as_mut()?;
                loop {
                    match active.next_event().await {
                        None => return None,
                        Some(event) if event.task_id() == Some(task_id.as_str()) => break event,
                        Some(_) => continue,
                    }
                }
            };
            Some((Ok(event), (queue, task_id)))
        });

        Ok(futures::stream::once(async move { Ok(first) }).chain(tail))
    }

    async fn prepare_send(
        &self,
        params: MessageSendParams,
    ) -> ServerResult<(Message, Option<Task>, String)> {
        let mut message = params.message;
        if message.message_id.is_empty() {
            return Err(ServerError::InvalidParams(
                "message.messageId is required".to_string(),
            ));
        }

        let existing = match &message.task_id {
            Some(task_id) => Some(
                self.store
                    .load(task_id)
                    .await
                    .ok_or_else(|| ServerError::TaskNotFound(task_id.clone()))?,
            ),
            None => None,
        };

        let context_id = message
            .context_id
            .clone()
            .or_else(|| existing.as_ref().map(|t| t.context_id.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        message.context_id = Some(context_id.clone());

        Ok((message, existing, context_id))
    }

    fn spawn_executor(
        &self,
        message: Message,
        existing: Option<Task>,
    ) -> tokio::task::JoinHandle<()> {
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.execute(message, existing).await;
        })
    }

    async fn publish_failure(&self, task: Option<&Task>, err: &ServerError) {
        publish_failure_on(&self.bus, task, err).await;
    }

    fn ensure_streaming(&self) -> ServerResult<()> {
        if self.agent_card.capabilities.streaming == Some(false) {
            return Err(ServerError::StreamingNotSupported);
        }
        Ok(())
    }

    fn ensure_push_notifications(&self) -> ServerResult<()> {
        if self.agent_card.capabilities.push_notifications != Some(true) {
            return Err(ServerError::PushNotificationNotSupported);
        }
        Ok(())
    }
}

/// Terminate the active task with a failed status after an event-processing
/// error, so other subscribers observe the failure too.
async fn publish_failure_on(bus: &EventBus, task: Option<&Task>, err: &ServerError) {
    let Some(task) = task else {
        return;
    };
    let note = Message::agent(
        Uuid::new_v4().to_string(),
        vec![Part::text(format!("Event processing failed: {err}"))],
    )
    .with_context_id(task.context_id.clone())
    .with_task_id(task.id.clone());
    let update = TaskStatusUpdateEvent {
        kind: STATUS_UPDATE_KIND.to_string(),
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        status: TaskStatus {
            state: TaskState::Failed,
            message: Some(note),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        },
        is_final: true,
        metadata: None,
    };
    if let Err(publish_err) = bus.publish(&StreamEvent::StatusUpdate(update)).await {
        error!(task_id = %task.id, error = %publish_err, "failed to publish failure update");
    }
}
