//! Model provider boundary.
//!
//! The orchestration loop talks to an opaque chat-completion endpoint through
//! the [`ModelProvider`] trait: it submits the conversation so far plus the
//! tools and hand-off targets the active agent may use, and receives exactly
//! one [`ModelAction`] back. [`openai::OpenAiChatProvider`] adapts any
//! OpenAI-compatible `/chat/completions` endpoint; [`script::ScriptedProvider`]
//! replays a fixed sequence of actions for tests and offline runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_core::{Result, Role, ToolDescriptor};

pub mod openai;
pub mod script;

pub use openai::{OpenAiChatProvider, OpenAiOptions};
pub use script::ScriptedProvider;

/// One message in the conversation sent to the provider.
///
/// `tool_call_id` and `tool_calls` are only populated on the tool/result
/// exchange: an assistant message echoes the calls the model issued, and each
/// `Role::Tool` message names the call it answers. Everything else is plain
/// `{role, content}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that issued tool calls. Endpoints validate the
    /// follow-up tool messages against this echo.
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_calls: calls,
        }
    }

    /// Result of one tool call, correlated back to the issuing call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A tool call the model asked for. `arguments` is already-decoded JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Everything the provider needs for one completion: the conversation so
/// far, the tools the active agent may call, and the agents it may hand
/// off to.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub handoff_targets: Vec<String>,
}

/// The single action a model reply decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAction {
    /// The model is done; `text` is the answer for the caller.
    Final { text: String },
    /// The model wants these tools run, in order, before it continues.
    ToolCalls(Vec<ToolCallRequest>),
    /// The model transfers the session to another agent.
    Handoff { target: String },
}

/// An opaque chat-completion endpoint. Implementations must be shareable
/// across concurrent sessions.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Submit one completion request and decode the reply into exactly one
    /// [`ModelAction`]. Transport and contract failures surface as
    /// `SwitchboardError::ProviderUnavailable`, which is fatal to the
    /// calling session.
    async fn complete(&self, request: CompletionRequest) -> Result<ModelAction>;
}
