//! Reference MCP tool servers.
//!
//! One binary, toolset chosen by argument; the serve loop is also exposed
//! over generic streams so tests can drive it in-process. The failure
//! injection flags in [`ServeOptions`] exist for exercising the client side
//! of the protocol: a server that refuses to initialize, one that never
//! answers, and one that exits mid-session.

use serde_json::Value;
use switchboard_mcp::McpTool;

pub mod calculator;
pub mod echo;
pub mod serve;

pub use calculator::Calculator;
pub use echo::Echo;
pub use serve::{serve, ServeOptions};

/// A named set of tools behind one stdio server.
pub trait Toolset: Send + Sync {
    fn name(&self) -> &str;

    /// Tool definitions advertised on `tools/list`.
    fn tools(&self) -> Vec<McpTool>;

    /// Handle one `tools/call`. Domain failures (a bad operand value)
    /// come back in-band as error content; protocol failures (unknown
    /// tool, undecodable parameters) become JSON-RPC error replies.
    fn call(&self, tool: &str, arguments: &Value) -> CallReply;
}

/// Outcome of one tool call as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    /// Delivered in the result's `content` array.
    Reply { text: String, is_error: bool },
    /// Delivered as a JSON-RPC `error` member.
    Failure { code: i32, message: String },
}

impl CallReply {
    pub fn text(text: impl Into<String>) -> Self {
        CallReply::Reply {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        CallReply::Reply {
            text: text.into(),
            is_error: true,
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        CallReply::Failure {
            code,
            message: message.into(),
        }
    }
}
