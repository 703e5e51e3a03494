//! Trivial toolset used to prove wiring end to end.

use serde_json::{json, Value};
use switchboard_mcp::types::METHOD_NOT_FOUND;
use switchboard_mcp::McpTool;

use crate::{CallReply, Toolset};

pub struct Echo;

impl Toolset for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn tools(&self) -> Vec<McpTool> {
        vec![McpTool {
            name: "echo".to_string(),
            description: "Echo the message back".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "Message to echo"}
                },
                "required": ["message"],
            }),
        }]
    }

    fn call(&self, tool: &str, arguments: &Value) -> CallReply {
        match tool {
            "echo" => {
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                CallReply::text(format!("Echo: {message}"))
            }
            other => CallReply::failure(METHOD_NOT_FOUND, format!("Unknown tool: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_the_message() {
        let reply = Echo.call("echo", &json!({"message": "hello"}));
        assert_eq!(reply, CallReply::text("Echo: hello"));
    }

    #[test]
    fn missing_message_echoes_empty() {
        let reply = Echo.call("echo", &json!({}));
        assert_eq!(reply, CallReply::text("Echo: "));
    }
}
