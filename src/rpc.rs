//! JSON-RPC 2.0 message model
//!
//! Shared by both wire surfaces of the bridge: the newline-delimited editor
//! channel and the streamable HTTP client protocol. Messages are built as
//! `serde_json::Value` objects so the transports stay payload-agnostic;
//! inbound requests are parsed into [`JsonRpcRequest`] at the dispatch
//! boundary.

use serde::Deserialize;
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes, plus the session-misuse code the
// streamable transport uses.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const BAD_SESSION: i64 = -32000;

/// An inbound JSON-RPC request or notification.
///
/// `id` is kept as a raw `Value` since callers may use numbers or strings;
/// it is echoed back verbatim in responses.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and expect no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The `jsonrpc` member must be exactly "2.0".
    pub fn is_valid(&self) -> bool {
        self.jsonrpc.as_deref() == Some(JSONRPC_VERSION)
    }
}

/// Build a notification. `params` is omitted when null, so
/// `notification("ping", Value::Null)` yields the bare keep-alive frame.
pub fn notification(method: &str, params: Value) -> Value {
    let mut msg = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
    if !params.is_null() {
        msg["params"] = params;
    }
    msg
}

/// Build a success response echoing the request id.
pub fn response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

/// Build an error response. `id` is `Value::Null` when the request id is
/// unknown (parse failures, session misuse).
pub fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Build a request with a numeric id (editor-bound calls).
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params })
}
