//! JSON-RPC 2.0 messages as used by MCP.
//!
//! A line on the wire is either a request (carries an `id` and gets exactly
//! one reply) or a notification (no `id`, no reply). MCP narrows JSON-RPC by
//! forbidding `null` ids.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MCP protocol revision spoken by this server.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "cam-tool-exchange";

const JSONRPC_VERSION: &str = "2.0";

/// A request id: string or integer, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// An incoming request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol tag, always "2.0".
    pub jsonrpc: String,
    /// Request id echoed in the reply.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// An incoming notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol tag, always "2.0".
    pub jsonrpc: String,
    /// Notification name.
    pub method: String,
    /// Notification parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A success reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Builds a success reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Input was not JSON.
    ParseError,
    /// JSON that is not a valid message.
    InvalidRequest,
    /// Unknown method.
    MethodNotFound,
    /// Bad method parameters.
    InvalidParams,
    /// Server-side failure.
    InternalError,
}

impl ErrorCode {
    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    /// Standard message text.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// Numeric code.
    pub code: i32,
    /// Short description.
    pub message: String,
    /// Extra detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Error with the code's standard message.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// An error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Id of the failed request, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Builds an error reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// The input was not JSON.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// The input was JSON but not a message.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// The server is not in a state to accept the request.
    #[must_use]
    pub fn invalid_state(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, message),
        )
    }

    /// Unknown method.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Bad parameters.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Server-side failure.
    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }
}

/// A parsed incoming line.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Needs a reply.
    Request(JsonRpcRequest),
    /// Fire and forget.
    Notification(JsonRpcNotification),
}

/// Parses one line of input.
///
/// # Errors
///
/// Returns a parse error for non-JSON input and an invalid-request error for
/// JSON that is not a "2.0" request or notification.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(line).map_err(|_| JsonRpcError::parse_error())?;
    let Value::Object(obj) = value else {
        return Err(JsonRpcError::parse_error());
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(None));
    }

    if obj.contains_key("id") {
        let request: JsonRpcRequest = from_object(obj)?;
        if request.method.is_empty() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }
        Ok(IncomingMessage::Request(request))
    } else {
        from_object(obj).map(IncomingMessage::Notification)
    }
}

fn from_object<T: serde::de::DeserializeOwned>(obj: Map<String, Value>) -> Result<T, JsonRpcError> {
    serde_json::from_value(Value::Object(obj)).map_err(|_| JsonRpcError::invalid_request(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_numeric_id() {
        let msg = parse_message(r#"{"jsonrpc": "2.0", "id": 7, "method": "ping"}"#).unwrap();
        let IncomingMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::Number(7));
        assert_eq!(req.method, "ping");
        assert!(req.params.is_none());
    }

    #[test]
    fn request_with_string_id() {
        let msg = parse_message(r#"{"jsonrpc": "2.0", "id": "a-1", "method": "tools/list"}"#)
            .unwrap();
        let IncomingMessage::Request(req) = msg else {
            panic!("expected request");
        };
        assert_eq!(req.id, RequestId::String("a-1".into()));
    }

    #[test]
    fn notification_has_no_id() {
        let msg = parse_message(r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#)
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Notification(n) if n.method == "notifications/initialized"));
    }

    #[test]
    fn null_id_is_rejected() {
        let err = parse_message(r#"{"jsonrpc": "2.0", "id": null, "method": "ping"}"#).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn empty_method_keeps_id() {
        let err = parse_message(r#"{"jsonrpc": "2.0", "id": 3, "method": ""}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(3)));
    }

    #[test]
    fn non_json_and_non_object() {
        assert_eq!(
            parse_message("{{").unwrap_err().error.code,
            ErrorCode::ParseError.code()
        );
        assert_eq!(
            parse_message("[1, 2]").unwrap_err().error.code,
            ErrorCode::ParseError.code()
        );
    }

    #[test]
    fn wrong_version() {
        let err = parse_message(r#"{"jsonrpc": "1.0", "id": 1, "method": "ping"}"#).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn error_reply_shape() {
        let json = serde_json::to_value(JsonRpcError::method_not_found(
            RequestId::Number(1),
            "nope",
        ))
        .unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(json["error"]["message"], "Method not found: nope");
        assert!(json["error"].get("data").is_none());
    }
}
