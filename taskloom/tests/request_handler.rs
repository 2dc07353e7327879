//! End-to-end tests driving the request handler over the in-memory cache.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use taskloom::cache::{CacheService, InMemoryCacheService};
use taskloom::events::EventBus;
use taskloom::executor::{
    AgentIdentity, AgentKind, ExecutionContext, HandlerError, HandlerResult, TaskExecutor,
    TaskHandler,
};
use taskloom::task::CacheTaskStore;
use taskloom::{RequestHandler, ServerError};
use taskloom_types::{
    AgentCard, Message, MessageSendParams, Part, PushNotificationConfig, SendMessageResult,
    StreamEvent, TaskIdParams, TaskPushNotificationConfig, TaskQueryParams, TaskState,
};

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(
        &self,
        message: Message,
        _context: ExecutionContext,
    ) -> Result<HandlerResult, HandlerError> {
        Ok(HandlerResult::Text(format!("Echo: {}", message.text())))
    }
}

struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn handle(
        &self,
        _message: Message,
        _context: ExecutionContext,
    ) -> Result<HandlerResult, HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok("late reply".into())
    }
}

/// Reports its task id through a oneshot channel, then idles for `delay`
/// before replying. Lets tests learn a generated task id mid-flight.
struct ProbeHandler {
    delay: Duration,
    task_id_tx: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<String>>>,
}

impl ProbeHandler {
    fn new(delay: Duration) -> (Arc<Self>, tokio::sync::oneshot::Receiver<String>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Arc::new(Self {
                delay,
                task_id_tx: std::sync::Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

#[async_trait]
impl TaskHandler for ProbeHandler {
    async fn handle(
        &self,
        _message: Message,
        context: ExecutionContext,
    ) -> Result<HandlerResult, HandlerError> {
        if let Ok(mut guard) = self.task_id_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(context.task.id.clone());
            }
        }
        tokio::time::sleep(self.delay).await;
        Ok("late reply".into())
    }
}

fn default_card() -> AgentCard {
    AgentCard::new("echo", "Echoes messages", "1.0.0", "http://localhost:3000")
        .with_streaming(true)
        .with_push_notifications(true)
}

fn build_handler(card: AgentCard, handler: Arc<dyn TaskHandler>) -> RequestHandler {
    let cache = Arc::new(InMemoryCacheService::new()) as Arc<dyn CacheService>;
    let store = Arc::new(CacheTaskStore::new(cache.clone()));
    let bus = EventBus::new(cache.clone());
    let executor = Arc::new(TaskExecutor::new(
        bus.clone(),
        AgentIdentity::new("echo", AgentKind::Worker),
        handler,
    ));
    RequestHandler::new(card, cache, store, bus, executor)
}

fn send_params(message_id: &str, text: &str) -> MessageSendParams {
    MessageSendParams {
        message: Message::user(message_id, vec![Part::text(text)]),
        configuration: None,
        metadata: None,
    }
}

#[tokio::test]
async fn send_message_completes_with_echoed_reply() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let result = handler
        .send_message(send_params("m1", "hello world"))
        .await
        .unwrap();

    let SendMessageResult::Task(task) = result else {
        panic!("expected a task result");
    };
    assert_eq!(task.status.state, TaskState::Completed);
    let reply = task.status.message.as_ref().unwrap();
    assert_eq!(reply.parts, vec![Part::text("Echo: hello world")]);
    assert_eq!(task.history.len(), 1);
    assert_eq!(task.history[0].message_id, "m1");
}

#[tokio::test]
async fn send_message_requires_a_message_id() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));
    let err = handler.send_message(send_params("", "hi")).await.unwrap_err();
    assert!(matches!(err, ServerError::InvalidParams(_)));
}

#[tokio::test]
async fn send_message_with_unknown_task_id_fails() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));
    let mut params = send_params("m1", "hi");
    params.message.task_id = Some("ghost".to_string());

    let err = handler.send_message(params).await.unwrap_err();
    assert!(matches!(err, ServerError::TaskNotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn stream_yields_submitted_working_completed_in_order() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let stream = handler
        .send_message_stream(send_params("m1", "hello world"))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = stream.map(|item| item.unwrap()).collect().await;

    assert_eq!(events.len(), 3);
    let StreamEvent::Task(task) = &events[0] else {
        panic!("first event must be the task");
    };
    assert_eq!(task.status.state, TaskState::Submitted);

    let StreamEvent::StatusUpdate(working) = &events[1] else {
        panic!("second event must be a status update");
    };
    assert_eq!(working.status.state, TaskState::Working);
    assert!(!working.is_final);

    let StreamEvent::StatusUpdate(done) = &events[2] else {
        panic!("third event must be a status update");
    };
    assert_eq!(done.status.state, TaskState::Completed);
    assert!(done.is_final);
}

#[tokio::test]
async fn streaming_disabled_rejects_stream_requests() {
    let card = default_card().with_streaming(false);
    let handler = build_handler(card, Arc::new(EchoHandler));

    let err = handler
        .send_message_stream(send_params("m1", "hi"))
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, ServerError::StreamingNotSupported));
    assert_eq!(err.code(), -32004);
}

#[tokio::test]
async fn get_task_truncates_history_to_last_n() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let SendMessageResult::Task(task) = handler
        .send_message(send_params("m1", "hello"))
        .await
        .unwrap()
    else {
        panic!("expected a task result");
    };

    // Completed snapshot has the user message in history; fetch with a zero
    // window to drop it.
    let fetched = handler
        .get_task(TaskQueryParams {
            id: task.id.clone(),
            history_length: Some(0),
            metadata: None,
        })
        .await
        .unwrap();
    assert!(fetched.history.is_empty());

    let fetched = handler
        .get_task(TaskQueryParams {
            id: task.id.clone(),
            history_length: None,
            metadata: None,
        })
        .await
        .unwrap();
    assert!(!fetched.history.is_empty());

    let err = handler
        .get_task(TaskQueryParams {
            id: "ghost".to_string(),
            history_length: None,
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::TaskNotFound(_)));
}

#[tokio::test]
async fn cancel_during_execution_resolves_send_with_canceled_task() {
    let (probe, task_id_rx) = ProbeHandler::new(Duration::from_secs(10));
    let handler = Arc::new(build_handler(default_card(), probe));

    let send = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.send_message(send_params("m1", "long job")).await })
    };

    let task_id = task_id_rx.await.unwrap();
    // Give the send loop time to reduce the task event into the store.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let canceled = handler
        .cancel_task(TaskIdParams {
            id: task_id.clone(),
            metadata: None,
        })
        .await
        .unwrap();
    assert_eq!(canceled.status.state, TaskState::Canceled);

    let result = send.await.unwrap().unwrap();
    let SendMessageResult::Task(task) = result else {
        panic!("expected a task result");
    };
    assert_eq!(task.id, task_id);
    assert_eq!(task.status.state, TaskState::Canceled);
}

#[tokio::test(start_paused = true)]
async fn send_message_times_out_and_cancels_the_handler() {
    let handler = build_handler(
        default_card(),
        Arc::new(SlowHandler {
            delay: Duration::from_secs(300),
        }),
    );

    let err = handler
        .send_message(send_params("m1", "never finishes"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Internal(message) if message == "Timeout"));
}

#[tokio::test]
async fn cancel_of_terminal_task_fails_not_cancelable() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let SendMessageResult::Task(task) = handler
        .send_message(send_params("m1", "hello"))
        .await
        .unwrap()
    else {
        panic!("expected a task result");
    };

    let err = handler
        .cancel_task(TaskIdParams {
            id: task.id,
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::TaskNotCancelable(_)));
    assert_eq!(err.code(), -32002);
}

#[tokio::test]
async fn push_config_round_trips_when_supported() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let SendMessageResult::Task(task) = handler
        .send_message(send_params("m1", "hello"))
        .await
        .unwrap()
    else {
        panic!("expected a task result");
    };

    let config = PushNotificationConfig {
        url: "https://client.example/webhook".to_string(),
        id: None,
        token: Some("secret".to_string()),
        authentication: None,
    };
    handler
        .set_push_notification_config(TaskPushNotificationConfig {
            task_id: task.id.clone(),
            push_notification_config: config.clone(),
        })
        .await
        .unwrap();

    let fetched = handler
        .get_push_notification_config(TaskIdParams {
            id: task.id.clone(),
            metadata: None,
        })
        .await
        .unwrap();
    assert_eq!(fetched.push_notification_config, config);

    // Fetching for a task without a stored config is an internal error.
    let SendMessageResult::Task(other) = handler
        .send_message(send_params("m2", "another"))
        .await
        .unwrap()
    else {
        panic!("expected a task result");
    };
    let err = handler
        .get_push_notification_config(TaskIdParams {
            id: other.id,
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Internal(_)));
}

#[tokio::test]
async fn push_config_rejected_when_capability_disabled() {
    let card = default_card().with_push_notifications(false);
    let handler = build_handler(card, Arc::new(EchoHandler));

    let err = handler
        .set_push_notification_config(TaskPushNotificationConfig {
            task_id: "t1".to_string(),
            push_notification_config: PushNotificationConfig {
                url: "https://client.example/webhook".to_string(),
                id: None,
                token: None,
                authentication: None,
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::PushNotificationNotSupported));
    assert_eq!(err.code(), -32003);
}

#[tokio::test]
async fn resubscribe_to_terminal_task_yields_only_the_task() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));

    let SendMessageResult::Task(task) = handler
        .send_message(send_params("m1", "hello"))
        .await
        .unwrap()
    else {
        panic!("expected a task result");
    };

    let stream = handler
        .resubscribe(TaskIdParams {
            id: task.id.clone(),
            metadata: None,
        })
        .await
        .unwrap();
    let events: Vec<_> = stream.map(|item| item.unwrap()).collect().await;

    assert_eq!(events.len(), 1);
    let StreamEvent::Task(yielded) = &events[0] else {
        panic!("expected the task event");
    };
    assert_eq!(yielded.id, task.id);
    assert!(yielded.is_terminal());
}

#[tokio::test]
async fn resubscribe_to_running_task_follows_it_to_completion() {
    let (probe, task_id_rx) = ProbeHandler::new(Duration::from_millis(800));
    let handler = Arc::new(build_handler(default_card(), probe));

    let send = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.send_message(send_params("m1", "long job")).await })
    };

    let task_id = task_id_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stream = handler
        .resubscribe(TaskIdParams {
            id: task_id.clone(),
            metadata: None,
        })
        .await
        .unwrap();
    let events: Vec<_> = stream.map(|item| item.unwrap()).collect().await;

    let StreamEvent::Task(snapshot) = &events[0] else {
        panic!("expected the task snapshot first");
    };
    assert_eq!(snapshot.id, task_id);
    let StreamEvent::StatusUpdate(last) = events.last().unwrap() else {
        panic!("expected a final status update");
    };
    assert!(last.is_final);
    assert_eq!(last.status.state, TaskState::Completed);

    send.await.unwrap().unwrap();
}

#[tokio::test]
async fn resubscribe_to_unknown_task_fails() {
    let handler = build_handler(default_card(), Arc::new(EchoHandler));
    let err = handler
        .resubscribe(TaskIdParams {
            id: "ghost".to_string(),
            metadata: None,
        })
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, ServerError::TaskNotFound(_)));
    assert_eq!(err.code(), -32001);
}
