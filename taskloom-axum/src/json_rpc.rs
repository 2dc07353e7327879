use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskloom::ServerError;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<JsonRpcId>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<JsonRpcId>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC ID can be string, number, or null
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    Null,
}

impl JsonRpcResponse {
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<JsonRpcId>, code: i32, message: String) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error envelope for a runtime error.
    pub fn from_server_error(id: Option<JsonRpcId>, err: &ServerError) -> Self {
        Self::error(id, err.code(), err.to_string())
    }
}

/// Validate the JSON-RPC envelope of a parsed request.
pub fn validate_request(request: &JsonRpcRequest) -> Result<(), ServerError> {
    if request.jsonrpc != "2.0" {
        return Err(ServerError::InvalidRequest(
            "jsonrpc version must be \"2.0\"".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_wrong_version() {
        let request = JsonRpcRequest {
            jsonrpc: "1.0".to_string(),
            method: "message/send".to_string(),
            params: None,
            id: None,
        };
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn error_envelope_carries_wire_code() {
        let response = JsonRpcResponse::from_server_error(
            Some(JsonRpcId::Number(7)),
            &ServerError::TaskNotFound("t1".to_string()),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["error"]["code"], -32001);
        assert_eq!(json["id"], 7);
        assert!(json.get("result").is_none());
    }
}
