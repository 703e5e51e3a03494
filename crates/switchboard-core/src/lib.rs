use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a registered tool server. Matches the key the server was
/// registered under in the catalog (usually the config entry name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A tool as advertised through the catalog: discovery metadata plus the
/// server that owns it. Immutable once discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server: ServerId,
}

/// Conversation roles as presented to the model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Outcome of one tool invocation. Failures are data, not control flow: the
/// orchestration loop feeds both variants back into the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { content: String },
    Error { message: String },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }

    /// Text fed back to the model, whichever variant this is.
    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success { content } => content,
            ToolOutcome::Error { message } => message,
        }
    }
}

/// One entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TurnKind,
}

impl Turn {
    pub fn new(kind: TurnKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

/// The closed set of things a transcript can record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnKind {
    /// Active-agent instructions. Appended at session start and again on
    /// every hand-off; earlier instruction turns stay in place.
    Instructions { agent: String, text: String },
    User { text: String },
    Assistant { text: String },
    /// A model-issued tool call. `request_id` correlates with the matching
    /// `ToolResult` turn one-to-one.
    ToolCall {
        request_id: String,
        tool: String,
        arguments: Value,
    },
    ToolResult {
        request_id: String,
        tool: String,
        outcome: ToolOutcome,
    },
    Handoff { from: String, to: String },
    /// A hand-off the active agent was not allowed to make. Recorded so the
    /// model sees the refusal; the active agent does not change.
    HandoffDenied { from: String, to: String },
}

/// A query entering the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    /// Correlation id; generated when the caller did not supply one.
    #[serde(default)]
    pub request_id: Option<Uuid>,
    /// Explicit starting agent; defaults to the registry's routing policy.
    #[serde(default)]
    pub agent: Option<String>,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            request_id: None,
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// Result of a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub response: String,
    pub active_agent: String,
    pub duration_ms: u64,
    pub steps_used: u32,
    pub request_id: Uuid,
}

/// Structured error shape handed to serializing callers, carrying the
/// correlation id of the request that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryError {
    pub error: String,
    pub request_id: Option<Uuid>,
}

impl QueryError {
    pub fn new(error: &SwitchboardError, request_id: Option<Uuid>) -> Self {
        Self {
            error: error.to_string(),
            request_id,
        }
    }
}

#[derive(Error, Debug)]
pub enum SwitchboardError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("tool server '{server}' failed to start: {reason}")]
    Startup { server: ServerId, reason: String },

    #[error("tool server '{0}' is unavailable")]
    ProcessUnavailable(ServerId),

    #[error("tool server '{0}' is already registered")]
    DuplicateServer(ServerId),

    #[error("tool '{tool}' failed (code {code}): {message}")]
    ToolExecution {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    #[error("tool '{tool}' is not permitted for agent '{agent}'")]
    ToolNotPermitted { tool: String, agent: String },

    #[error("no ready tool server advertises '{0}'")]
    UnknownTool(String),

    #[error("agent '{from}' may not hand off to '{to}'")]
    HandoffNotAllowed { from: String, to: String },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("agent '{agent}' lists unregistered hand-off target '{target}'")]
    InvalidHandoffTarget { agent: String, target: String },

    #[error("step budget of {0} exhausted")]
    StepBudgetExceeded(u32),

    #[error("model provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("session cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwitchboardError {
    /// Session-fatal errors terminate the loop; everything else is either
    /// absorbed into the transcript or fails a single step.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SwitchboardError::StepBudgetExceeded(_)
                | SwitchboardError::ProviderUnavailable(_)
                | SwitchboardError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
