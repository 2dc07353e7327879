//! Per-request event queue bound to one `(bus, contextId)` pair.
//!
//! The queue buffers the context's events and hands them to a single
//! consumer until a terminal event (a standalone `Message`, or a
//! `StatusUpdate` flagged final) has been yielded. Termination, `stop()`,
//! and drop all release the underlying bus listener.

use futures::stream::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

use taskloom_types::StreamEvent;

use super::event_bus::{BusDelivery, ContextListener, EventBus};

struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

enum Step {
    Stopped,
    Delivery(Option<BusDelivery>),
}

/// Cancels a queue from anywhere: another task, a timeout, an upstream
/// error path. Idempotent.
#[derive(Clone)]
pub struct QueueStopHandle {
    signal: Arc<StopSignal>,
}

impl QueueStopHandle {
    pub fn stop(&self) {
        self.signal.stopped.store(true, Ordering::Release);
        self.signal.notify.notify_waiters();
    }
}

/// FIFO of one context's events with completion semantics.
pub struct ExecutionEventQueue {
    bus: EventBus,
    context_id: String,
    listener: ContextListener,
    signal: Arc<StopSignal>,
    done: bool,
}

impl ExecutionEventQueue {
    /// Bind a queue to a context, registering it on the bus.
    pub fn new(bus: &EventBus, context_id: &str) -> Self {
        let listener = bus.on_context(context_id);
        Self {
            bus: bus.clone(),
            context_id: context_id.to_string(),
            listener,
            signal: Arc::new(StopSignal {
                stopped: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            done: false,
        }
    }

    /// A handle that stops this queue from another task.
    pub fn stop_handle(&self) -> QueueStopHandle {
        QueueStopHandle {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Next event, or `None` once the queue has terminated. After a terminal
    /// event is yielded the queue yields nothing more and its listener is
    /// unregistered; discontinuity notices are logged and skipped.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if self.done {
                return None;
            }
            let step = {
                let signal = Arc::clone(&self.signal);
                let stopped = signal.notify.notified();
                // Check after arming the waiter so a stop landing between
                // the check and the select is not missed.
                if signal.stopped.load(Ordering::Acquire) {
                    Step::Stopped
                } else {
                    tokio::select! {
                        _ = stopped => Step::Stopped,
                        delivery = self.listener.receiver.recv() => Step::Delivery(delivery),
                    }
                }
            };
            match step {
                Step::Stopped | Step::Delivery(None) => {
                    self.finish();
                    return None;
                }
                Step::Delivery(Some(BusDelivery::Event(event))) => {
                    if event.ends_stream() {
                        self.finish();
                    }
                    return Some(event);
                }
                Step::Delivery(Some(BusDelivery::Discontinuity(notice))) => {
                    warn!(
                        context_id = %notice.context_id,
                        from_sequence = notice.from_sequence,
                        to_sequence = notice.to_sequence,
                        "events lost between sequences"
                    );
                }
            }
        }
    }

    /// Adapt the queue into a stream of events; the stream ends when the
    /// queue terminates.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut queue| async move {
            queue.next_event().await.map(|event| (event, queue))
        })
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.bus.release_listener(&self.context_id, self.listener.id);
            self.listener.receiver.close();
        }
    }
}

impl Drop for ExecutionEventQueue {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheService, InMemoryCacheService};
    use std::time::Duration;
    use taskloom_types::{
        Message, Part, TaskState, TaskStatus, TaskStatusUpdateEvent, STATUS_UPDATE_KIND,
    };

    fn status_update(context_id: &str, state: TaskState, is_final: bool) -> StreamEvent {
        StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            kind: STATUS_UPDATE_KIND.to_string(),
            task_id: "t1".to_string(),
            context_id: context_id.to_string(),
            status: TaskStatus::new(state),
            is_final,
            metadata: None,
        })
    }

    fn new_bus() -> EventBus {
        EventBus::new(std::sync::Arc::new(InMemoryCacheService::new()) as Arc<dyn CacheService>)
    }

    #[tokio::test]
    async fn terminates_after_final_status_update() {
        let bus = new_bus();
        let mut queue = ExecutionEventQueue::new(&bus, "ctx-1");

        bus.publish(&status_update("ctx-1", TaskState::Working, false))
            .await
            .unwrap();
        bus.publish(&status_update("ctx-1", TaskState::Completed, true))
            .await
            .unwrap();

        let first = queue.next_event().await.unwrap();
        assert!(!first.ends_stream());
        let second = queue.next_event().await.unwrap();
        assert!(second.ends_stream());

        assert!(queue.next_event().await.is_none());
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }

    #[tokio::test]
    async fn terminates_after_message_event() {
        let bus = new_bus();
        let mut queue = ExecutionEventQueue::new(&bus, "ctx-1");

        let message = StreamEvent::Message(
            Message::agent("m-reply", vec![Part::text("done")]).with_context_id("ctx-1"),
        );
        bus.publish(&message).await.unwrap();

        assert!(queue.next_event().await.is_some());
        assert!(queue.next_event().await.is_none());
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }

    #[tokio::test]
    async fn stop_wakes_a_pending_consumer() {
        let bus = new_bus();
        let mut queue = ExecutionEventQueue::new(&bus, "ctx-1");
        let handle = queue.stop_handle();

        let waiter = tokio::spawn(async move { queue.next_event().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
        handle.stop(); // idempotent

        let yielded = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop must wake the consumer promptly")
            .unwrap();
        assert!(yielded.is_none());
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }

    #[tokio::test]
    async fn drop_releases_the_listener() {
        let bus = new_bus();
        let queue = ExecutionEventQueue::new(&bus, "ctx-1");
        assert_eq!(bus.listener_count("ctx-1"), 1);
        drop(queue);
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }
}
