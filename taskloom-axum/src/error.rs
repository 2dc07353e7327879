use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use taskloom::ServerError;

use crate::json_rpc::{JsonRpcId, JsonRpcResponse};

/// Map a runtime error to the HTTP status its JSON-RPC envelope rides on.
fn http_status(err: &ServerError) -> StatusCode {
    match err {
        ServerError::InvalidRequest(_) | ServerError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        ServerError::MethodNotFound(_) | ServerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        ServerError::TaskNotCancelable(_) => StatusCode::CONFLICT,
        ServerError::PushNotificationNotSupported | ServerError::StreamingNotSupported => {
            StatusCode::NOT_IMPLEMENTED
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the full error response for a failed JSON-RPC call.
pub fn error_response(id: Option<JsonRpcId>, err: &ServerError) -> Response {
    let body = JsonRpcResponse::from_server_error(id, err);
    (http_status(err), Json(body)).into_response()
}
