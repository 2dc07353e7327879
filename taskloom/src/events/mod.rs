//! Event distribution: the per-context publish/subscribe bus and the
//! per-request execution event queue.

mod event_bus;
mod event_queue;

pub use event_bus::{BusDelivery, ContextListener, DiscontinuityNotice, EventBus};
pub use event_queue::{ExecutionEventQueue, QueueStopHandle};
