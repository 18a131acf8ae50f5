//! JSON-RPC tool-invocation protocol: method routing on top of the
//! dispatcher.

pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod tools;

use serde::Deserialize;
use serde_json::{json, Value};

use dispatch::{DispatchError, Dispatcher};
use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "beacon";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Routes parsed JSON-RPC requests to their method handlers.
#[derive(Clone)]
pub struct McpHandler {
    dispatcher: Dispatcher,
}

impl McpHandler {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Handle one request. Never fails: every problem becomes a JSON-RPC
    /// error response.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        tracing::debug!(method = %request.method, "handling request");

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.server_info()),
            "notifications/initialized" | "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.list_tools()),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            },
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        }
    }

    fn server_info(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }

    fn list_tools(&self) -> Value {
        json!({ "tools": self.dispatcher.list_tools() })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("Missing params for tools/call"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| {
                    JsonRpcError::invalid_params(format!("Invalid params for tools/call: {e}"))
                })
            })?;

        match self.dispatcher.dispatch(&params.name, params.arguments).await {
            Ok(result) => Ok(text_content(result)),
            Err(e @ (DispatchError::UnknownTool(_) | DispatchError::InvalidParams { .. })) => {
                Err(JsonRpcError::invalid_params(e.to_string()))
            }
            Err(e @ DispatchError::ExecutionFailure { .. }) => {
                Err(JsonRpcError::tool_execution(e.to_string()))
            }
        }
    }
}

/// Wrap a capability result as a single text content block. String results
/// are used verbatim; anything else is rendered as JSON.
fn text_content(result: Value) -> Value {
    let text = match result {
        Value::String(s) => s,
        other => other.to_string(),
    };
    json!({ "content": [{ "type": "text", "text": text }] })
}
