//! MCP method dispatch
//!
//! Serves the session-scoped slice of the Model Context Protocol:
//! `initialize`, `ping`, `tools/list` and `tools/call`, plus the
//! notifications the bridge pushes (`ide/contextUpdate` and the diff
//! outcomes). The transport half lives in [`crate::http`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::IdeContext;
use crate::diff::DiffCoordinator;
use crate::rpc::{self, JsonRpcRequest};

/// Protocol revision implemented by the bridge.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Notification method carrying an [`IdeContext`] snapshot.
pub const METHOD_CONTEXT_UPDATE: &str = "ide/contextUpdate";

pub const TOOL_OPEN_DIFF: &str = "openDiff";
pub const TOOL_CLOSE_DIFF: &str = "closeDiff";

/// Build the `ide/contextUpdate` notification for a snapshot.
pub fn context_notification(context: &IdeContext) -> Value {
    let params = serde_json::to_value(context).unwrap_or(Value::Null);
    rpc::notification(METHOD_CONTEXT_UPDATE, params)
}

/// Outcome of dispatching one inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// JSON-RPC response to return in the HTTP body.
    Reply(Value),
    /// Notification accepted; respond 202 with no body.
    Accepted,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenDiffArgs {
    file_path: PathBuf,
    new_content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseDiffArgs {
    file_path: PathBuf,
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Session-facing MCP surface. One instance serves every session.
#[derive(Clone)]
pub struct McpServer {
    diff: Arc<DiffCoordinator>,
}

impl McpServer {
    pub fn new(diff: Arc<DiffCoordinator>) -> Self {
        Self { diff }
    }

    /// Result payload for a successful `initialize`.
    pub fn initialize_result() -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true }
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    /// Dispatch one already-parsed message on an established session.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Dispatch {
        if request.is_notification() {
            // notifications/initialized and friends; nothing to do beyond
            // accepting them.
            tracing::debug!("Accepted client notification {}", request.method);
            return Dispatch::Accepted;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Dispatch::Reply(rpc::error_response(
                id,
                rpc::INVALID_REQUEST,
                "Server already initialized",
            )),
            "ping" => Dispatch::Reply(rpc::response(id, json!({}))),
            "tools/list" => Dispatch::Reply(rpc::response(id, self.tools_list())),
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                let call: ToolCallParams = match serde_json::from_value(params) {
                    Ok(call) => call,
                    Err(e) => {
                        return Dispatch::Reply(rpc::error_response(
                            id,
                            rpc::INVALID_PARAMS,
                            &format!("Invalid tools/call params: {}", e),
                        ))
                    }
                };
                self.call_tool(id, call).await
            }
            other => Dispatch::Reply(rpc::error_response(
                id,
                rpc::METHOD_NOT_FOUND,
                &format!("Method not found: {}", other),
            )),
        }
    }

    fn tools_list(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": TOOL_OPEN_DIFF,
                    "description": "Open a diff view in the editor comparing a file with new content.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "filePath": { "type": "string" },
                            "newContent": { "type": "string" }
                        },
                        "required": ["filePath", "newContent"]
                    }
                },
                {
                    "name": TOOL_CLOSE_DIFF,
                    "description": "Close the diff view for a file, returning its edited content.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "filePath": { "type": "string" }
                        },
                        "required": ["filePath"]
                    }
                }
            ]
        })
    }

    async fn call_tool(&self, id: Value, call: ToolCallParams) -> Dispatch {
        match call.name.as_str() {
            TOOL_OPEN_DIFF => {
                let args: OpenDiffArgs = match serde_json::from_value(call.arguments) {
                    Ok(args) => args,
                    Err(e) => return invalid_args(id, TOOL_OPEN_DIFF, &e),
                };
                match self.diff.open_diff(&args.file_path, &args.new_content).await {
                    Ok(()) => Dispatch::Reply(rpc::response(id, json!({ "content": [] }))),
                    Err(e) => Dispatch::Reply(rpc::response(id, tool_error(&e.to_string()))),
                }
            }
            TOOL_CLOSE_DIFF => {
                let args: CloseDiffArgs = match serde_json::from_value(call.arguments) {
                    Ok(args) => args,
                    Err(e) => return invalid_args(id, TOOL_CLOSE_DIFF, &e),
                };
                match self.diff.close_diff(&args.file_path).await {
                    Ok(content) => {
                        let body = match content {
                            Some(text) => json!({ "content": text }),
                            None => json!({}),
                        };
                        let result = json!({
                            "content": [
                                { "type": "text", "text": body.to_string() }
                            ]
                        });
                        Dispatch::Reply(rpc::response(id, result))
                    }
                    Err(e) => Dispatch::Reply(rpc::response(id, tool_error(&e.to_string()))),
                }
            }
            other => Dispatch::Reply(rpc::error_response(
                id,
                rpc::INVALID_PARAMS,
                &format!("Unknown tool: {}", other),
            )),
        }
    }
}

fn invalid_args(id: Value, tool: &str, err: &serde_json::Error) -> Dispatch {
    Dispatch::Reply(rpc::error_response(
        id,
        rpc::INVALID_PARAMS,
        &format!("Invalid arguments for {}: {}", tool, err),
    ))
}

/// Tool execution failure, reported inside the tool result per MCP.
fn tool_error(message: &str) -> Value {
    json!({
        "content": [ { "type": "text", "text": message } ],
        "isError": true
    })
}
