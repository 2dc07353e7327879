use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use taskloom::{RequestHandler, ServerError};
use taskloom_types::{
    MessageSendParams, TaskIdParams, TaskPushNotificationConfig, TaskQueryParams,
};

use crate::error::error_response;
use crate::json_rpc::{validate_request, JsonRpcRequest, JsonRpcResponse};
use crate::sse::sse_response;

/// State shared across all routes.
#[derive(Clone)]
pub struct ServerState {
    pub handler: Arc<RequestHandler>,
}

/// Build the protocol router: one JSON-RPC POST endpoint at `base_path` and
/// the well-known agent card next to it.
pub fn create_routes(state: ServerState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');
    let rpc_path = if base.is_empty() { "/" } else { base };
    let card_path = format!("{base}/.well-known/agent.json");

    Router::new()
        .route(rpc_path, post(rpc_endpoint))
        .route(&card_path, get(agent_card))
        .with_state(state)
}

/// Single JSON-RPC endpoint dispatching on `method`.
async fn rpc_endpoint(State(state): State<ServerState>, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(None, &ServerError::InvalidRequest(err.to_string()));
        }
    };
    let id = request.id.clone();
    if let Err(err) = validate_request(&request) {
        return error_response(id, &err);
    }

    let handler = &state.handler;
    match request.method.as_str() {
        "message/send" => match parse_params::<MessageSendParams>(request.params) {
            Ok(params) => match handler.send_message(params).await {
                Ok(result) => json_result(id, &result),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        "message/stream" => match parse_params::<MessageSendParams>(request.params) {
            Ok(params) => match handler.send_message_stream(params).await {
                Ok(stream) => sse_response(id, stream),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        "tasks/get" => match parse_params::<TaskQueryParams>(request.params) {
            Ok(params) => match handler.get_task(params).await {
                Ok(task) => json_result(id, &task),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        "tasks/cancel" => match parse_params::<TaskIdParams>(request.params) {
            Ok(params) => match handler.cancel_task(params).await {
                Ok(task) => json_result(id, &task),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        "tasks/pushNotificationConfig/set" => {
            match parse_params::<TaskPushNotificationConfig>(request.params) {
                Ok(params) => match handler.set_push_notification_config(params).await {
                    Ok(config) => json_result(id, &config),
                    Err(err) => error_response(id, &err),
                },
                Err(err) => error_response(id, &err),
            }
        }
        "tasks/pushNotificationConfig/get" => match parse_params::<TaskIdParams>(request.params) {
            Ok(params) => match handler.get_push_notification_config(params).await {
                Ok(config) => json_result(id, &config),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        "tasks/resubscribe" => match parse_params::<TaskIdParams>(request.params) {
            Ok(params) => match handler.resubscribe(params).await {
                Ok(stream) => sse_response(id, stream),
                Err(err) => error_response(id, &err),
            },
            Err(err) => error_response(id, &err),
        },
        other => error_response(id, &ServerError::MethodNotFound(other.to_string())),
    }
}

/// Handler for the well-known agent card.
async fn agent_card(State(state): State<ServerState>) -> Json<taskloom_types::AgentCard> {
    Json(state.handler.agent_card().clone())
}

fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, ServerError> {
    let params = params.ok_or_else(|| ServerError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|err| ServerError::InvalidParams(err.to_string()))
}

fn json_result<T: serde::Serialize>(
    id: Option<crate::json_rpc::JsonRpcId>,
    result: &T,
) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(err) => error_response(id, &ServerError::from(err)),
    }
}
