//! # taskloom
//!
//! A stateless execution substrate for Agent-to-Agent (A2A) task processing.
//!
//! A client submits a message addressed to an agent; the runtime spawns a
//! task, drives it to a terminal state through a user-supplied
//! [`TaskHandler`](executor::TaskHandler), streams status and artifact
//! events to any number of subscribers, and persists the authoritative task
//! record in a shared cache so that any instance of the service can resume,
//! inspect, or stream it.
//!
//! The pieces compose left to right: [`RequestHandler`](requests::RequestHandler)
//! → [`TaskExecutor`](executor::TaskExecutor) → [`EventBus`](events::EventBus)
//! → [`ExecutionEventQueue`](events::ExecutionEventQueue)
//! → [`ResultManager`](task::ResultManager) → [`TaskStore`](task::TaskStore).

pub mod cache;
pub mod cards;
pub mod errors;
pub mod events;
pub mod executor;
pub mod requests;
pub mod task;

// Re-export the surface most callers need.
pub use cache::{CacheService, HttpCacheService, InMemoryCacheService};
pub use cards::AgentCardRegistry;
pub use errors::{ServerError, ServerResult};
pub use events::{EventBus, ExecutionEventQueue};
pub use executor::{AgentIdentity, AgentKind, HandlerResult, TaskExecutor, TaskHandler};
pub use requests::RequestHandler;
pub use task::{CacheTaskStore, ResultManager, TaskStore};
