//! Axum transport for taskloom agents: a single JSON-RPC 2.0 POST endpoint,
//! SSE streaming for `message/stream` and `tasks/resubscribe`, the
//! `.well-known/agent.json` card endpoint, and configurable CORS.

mod error;
mod json_rpc;
mod routes;
mod server;
mod sse;

pub use json_rpc::{JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse};
pub use server::{A2AServer, A2AServerBuilder, CorsConfig};
