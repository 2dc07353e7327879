//! SSE framing for streaming responses.
//!
//! Records are framed `id: {epochMs}-{rand}` / `data: {json-rpc envelope}`;
//! a `ping` event keeps the connection alive every 15 seconds, and a
//! mid-stream failure emits one `error` record before the stream closes.

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

use taskloom::{ServerError, ServerResult};
use taskloom_types::StreamEvent;

use crate::json_rpc::{JsonRpcId, JsonRpcResponse};

const HEARTBEAT: Duration = Duration::from_secs(15);

fn record_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

fn data_record(id: Option<JsonRpcId>, event: &StreamEvent) -> Event {
    let result = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let envelope = JsonRpcResponse::success(id, result);
    Event::default()
        .id(record_id())
        .data(serde_json::to_string(&envelope).unwrap_or_default())
}

fn error_record(id: Option<JsonRpcId>, err: &ServerError) -> Event {
    let envelope = JsonRpcResponse::from_server_error(id, err);
    Event::default()
        .event("error")
        .id(record_id())
        .data(serde_json::to_string(&envelope).unwrap_or_default())
}

/// Wrap a stream of events into an SSE response carrying JSON-RPC envelopes.
pub fn sse_response(
    id: Option<JsonRpcId>,
    stream: impl Stream<Item = ServerResult<StreamEvent>> + Send + 'static,
) -> Response {
    let records = stream.map(move |item| {
        Ok::<_, Infallible>(match item {
            Ok(event) => data_record(id.clone(), &event),
            Err(err) => error_record(id.clone(), &err),
        })
    });

    Sse::new(records)
        .keep_alive(
            KeepAlive::new()
                .interval(HEARTBEAT)
                .event(Event::default().event("ping")),
        )
        .into_response()
}
