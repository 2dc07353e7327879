//! Per-context publish/subscribe over the shared topic service.
//!
//! Each registered context gets one background poller per process. The
//! poller reads the context's topic in sequence order, fans events out to
//! local listeners, and converts broker gaps into [`DiscontinuityNotice`]s
//! without tearing itself down. Delivery is at-least-once; downstream
//! reducers stay idempotent on message and artifact ids.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use taskloom_types::StreamEvent;

use crate::cache::{CacheService, TopicItem};
use crate::errors::{ServerError, ServerResult};

const POLL_IDLE: Duration = Duration::from_millis(100);
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Signals that one or more events between `from_sequence` and `to_sequence`
/// on a context's topic were dropped by the broker and cannot be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscontinuityNotice {
    pub context_id: String,
    pub from_sequence: u64,
    pub to_sequence: u64,
}

/// What a context listener receives: an event, or a gap notice.
#[derive(Debug, Clone)]
pub enum BusDelivery {
    Event(StreamEvent),
    Discontinuity(DiscontinuityNotice),
}

/// A registered listener on one context.
pub struct ContextListener {
    pub(crate) id: u64,
    pub(crate) receiver: UnboundedReceiver<BusDelivery>,
}

struct ContextState {
    listeners: Vec<(u64, UnboundedSender<BusDelivery>)>,
    poller: JoinHandle<()>,
}

struct BusInner {
    cache: Arc<dyn CacheService>,
    contexts: Mutex<HashMap<String, ContextState>>,
    next_listener_id: AtomicU64,
}

impl Drop for BusInner {
    fn drop(&mut self) {
        if let Ok(mut contexts) = self.contexts.lock() {
            for (_, state) in contexts.drain() {
                state.poller.abort();
            }
        }
    }
}

/// Event bus over the shared cache's topics. Cheap to clone; all clones share
/// the same pollers and listener table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(cache: Arc<dyn CacheService>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                cache,
                contexts: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to its context's topic. The event must carry a
    /// non-empty context id.
    pub async fn publish(&self, event: &StreamEvent) -> ServerResult<()> {
        let context_id = event
            .context_id()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ServerError::InvalidParams("event is missing a contextId".to_string())
            })?;
        let payload = serde_json::to_string(event)?;
        self.inner.cache.topic_publish(context_id, &payload).await
    }

    /// Start polling a context's topic. Idempotent and safe to call
    /// concurrently from multiple consumers.
    pub fn register_context(&self, context_id: &str) {
        let mut contexts = lock(&self.inner.contexts);
        if contexts.contains_key(context_id) {
            return;
        }
        let poller = tokio::spawn(poll_context(
            Arc::clone(&self.inner.cache),
            Arc::downgrade(&self.inner),
            context_id.to_string(),
        ));
        contexts.insert(
            context_id.to_string(),
            ContextState {
                listeners: Vec::new(),
                poller,
            },
        );
    }

    /// Register the context and attach a listener that receives its
    /// deliveries.
    pub fn on_context(&self, context_id: &str) -> ContextListener {
        self.register_context(context_id);
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut contexts = lock(&self.inner.contexts);
        if let Some(state) = contexts.get_mut(context_id) {
            state.listeners.push((id, sender));
        }
        ContextListener { id, receiver }
    }

    /// Detach one listener. The context's poller is reaped when its last
    /// listener goes away.
    pub fn release_listener(&self, context_id: &str, listener_id: u64) {
        let mut contexts = lock(&self.inner.contexts);
        let Some(state) = contexts.get_mut(context_id) else {
            return;
        };
        state.listeners.retain(|(id, _)| *id != listener_id);
        if state.listeners.is_empty() {
            state.poller.abort();
            contexts.remove(context_id);
        }
    }

    /// Cancel the context's poller and drop all of its listeners.
    pub fn unregister_context(&self, context_id: &str) {
        let mut contexts = lock(&self.inner.contexts);
        if let Some(state) = contexts.remove(context_id) {
            state.poller.abort();
        }
    }

    /// Cancel every poller and drop every listener.
    pub fn close(&self) {
        let mut contexts = lock(&self.inner.contexts);
        for (_, state) in contexts.drain() {
            state.poller.abort();
        }
    }

    /// Number of live listeners on a context.
    pub fn listener_count(&self, context_id: &str) -> usize {
        lock(&self.inner.contexts)
            .get(context_id)
            .map(|state| state.listeners.len())
            .unwrap_or(0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // The sections guarded here never panic, so poisoning cannot occur;
    // recover the guard rather than propagating a poisoned lock.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Deliver to every live listener of the context. Returns false once the bus
/// itself is gone so the poller can exit.
fn dispatch(bus: &Weak<BusInner>, context_id: &str, delivery: BusDelivery) -> bool {
    let Some(inner) = bus.upgrade() else {
        return false;
    };
    let mut contexts = lock(&inner.contexts);
    if let Some(state) = contexts.get_mut(context_id) {
        state
            .listeners
            .retain(|(_, sender)| sender.send(delivery.clone()).is_ok());
    }
    true
}

/// Background loop reading one context's topic. Holds only a weak reference
/// back to the bus so an abandoned bus winds down its pollers.
async fn poll_context(cache: Arc<dyn CacheService>, bus: Weak<BusInner>, context_id: String) {
    let mut sequence: u64 = 0;
    let mut page: u64 = 0;
    loop {
        match cache.topic_subscribe(&context_id, sequence, page).await {
            Ok(batch) => {
                for item in batch.items {
                    match item {
                        TopicItem::Message {
                            sequence: seq,
                            payload,
                        } => {
                            match serde_json::from_str::<StreamEvent>(&payload) {
                                Ok(event) => {
                                    debug!(context_id = %context_id, sequence = seq, "event received");
                                    if !dispatch(&bus, &context_id, BusDelivery::Event(event)) {
                                        return;
                                    }
                                }
                                Err(err) => {
                                    warn!(context_id = %context_id, sequence = seq, error = %err, "dropping undecodable topic payload");
                                }
                            }
                            sequence = seq + 1;
                        }
                        TopicItem::Discontinuity {
                            new_sequence,
                            new_page,
                        } => {
                            warn!(
                                context_id = %context_id,
                                from_sequence = sequence,
                                to_sequence = new_sequence,
                                "topic discontinuity, events lost"
                            );
                            let notice = DiscontinuityNotice {
                                context_id: context_id.clone(),
                                from_sequence: sequence,
                                to_sequence: new_sequence,
                            };
                            if !dispatch(&bus, &context_id, BusDelivery::Discontinuity(notice)) {
                                return;
                            }
                            sequence = new_sequence + 1;
                            page = new_page;
                        }
                    }
                }
                tokio::time::sleep(POLL_IDLE).await;
            }
            Err(err) => {
                warn!(context_id = %context_id, error = %err, "topic poll failed, backing off");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
            }
        }
        if bus.strong_count() == 0 {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheService;
    use taskloom_types::{Message, Part, StreamEvent};

    fn user_event(context_id: &str, message_id: &str) -> StreamEvent {
        StreamEvent::Message(
            Message::user(message_id, vec![Part::text("hi")]).with_context_id(context_id),
        )
    }

    #[tokio::test]
    async fn publish_requires_context_id() {
        let bus = EventBus::new(Arc::new(InMemoryCacheService::new()));
        let event = StreamEvent::Message(Message::user("m1", vec![]));
        let err = bus.publish(&event).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn listeners_receive_context_events() {
        let bus = EventBus::new(Arc::new(InMemoryCacheService::new()));
        let mut listener = bus.on_context("ctx-1");

        bus.publish(&user_event("ctx-1", "m1")).await.unwrap();

        let delivery = listener.receiver.recv().await.unwrap();
        match delivery {
            BusDelivery::Event(StreamEvent::Message(m)) => assert_eq!(m.message_id, "m1"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn discontinuity_reports_pre_advance_sequence_and_keeps_polling() {
        let cache = Arc::new(InMemoryCacheService::new());
        let bus = EventBus::new(cache.clone() as Arc<dyn CacheService>);
        let mut listener = bus.on_context("ctx-1");

        bus.publish(&user_event("ctx-1", "m1")).await.unwrap();
        cache.inject_discontinuity("ctx-1", 5, 2).await;

        let first = listener.receiver.recv().await.unwrap();
        assert!(matches!(first, BusDelivery::Event(_)));

        let second = listener.receiver.recv().await.unwrap();
        match second {
            BusDelivery::Discontinuity(notice) => {
                assert_eq!(
                    notice,
                    DiscontinuityNotice {
                        context_id: "ctx-1".to_string(),
                        from_sequence: 1,
                        to_sequence: 5,
                    }
                );
            }
            other => panic!("unexpected delivery: {other:?}"),
        }

        // The poller survives the gap and resumes at sequence 6 on page 2.
        bus.publish(&user_event("ctx-1", "m2")).await.unwrap();
        let third = listener.receiver.recv().await.unwrap();
        match third {
            BusDelivery::Event(StreamEvent::Message(m)) => assert_eq!(m.message_id, "m2"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_and_unregister_clears_listeners() {
        let bus = EventBus::new(Arc::new(InMemoryCacheService::new()));
        bus.register_context("ctx-1");
        bus.register_context("ctx-1");
        let _a = bus.on_context("ctx-1");
        let _b = bus.on_context("ctx-1");
        assert_eq!(bus.listener_count("ctx-1"), 2);

        bus.unregister_context("ctx-1");
        bus.unregister_context("ctx-1");
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }

    #[tokio::test]
    async fn releasing_last_listener_reaps_the_poller() {
        let bus = EventBus::new(Arc::new(InMemoryCacheService::new()));
        let a = bus.on_context("ctx-1");
        let b = bus.on_context("ctx-1");

        bus.release_listener("ctx-1", a.id);
        assert_eq!(bus.listener_count("ctx-1"), 1);
        bus.release_listener("ctx-1", b.id);
        assert_eq!(bus.listener_count("ctx-1"), 0);
    }
}
