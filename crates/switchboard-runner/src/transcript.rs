//! Append-only session transcript and its provider-facing flattening.

use switchboard_core::{Turn, TurnKind};
use switchboard_provider::{ChatMessage, ToolCallRequest};

/// Ordered record of everything that happened in one session. Turns are
/// only ever appended, so any flattened view already produced stays a
/// stable prefix of later ones.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, kind: TurnKind) {
        self.turns.push(Turn::new(kind));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the transcript as the `{role, content}` sequence the model
    /// provider consumes. Instruction turns become system messages wherever
    /// they sit, so a hand-off's instructions land mid-conversation; tool
    /// calls and results keep their correlation ids so strict endpoints can
    /// validate the exchange. Hand-off outcomes are narrated as system
    /// messages since the provider has no native notion of them.
    pub fn flatten(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            match &turn.kind {
                TurnKind::Instructions { text, .. } => {
                    messages.push(ChatMessage::system(text.clone()));
                }
                TurnKind::User { text } => messages.push(ChatMessage::user(text.clone())),
                TurnKind::Assistant { text } => messages.push(ChatMessage::assistant(text.clone())),
                TurnKind::ToolCall {
                    request_id,
                    tool,
                    arguments,
                } => {
                    messages.push(ChatMessage::assistant_tool_calls(vec![ToolCallRequest {
                        id: request_id.clone(),
                        name: tool.clone(),
                        arguments: arguments.clone(),
                    }]));
                }
                TurnKind::ToolResult {
                    request_id, outcome, ..
                } => {
                    messages.push(ChatMessage::tool_result(
                        request_id.clone(),
                        outcome.text().to_string(),
                    ));
                }
                TurnKind::Handoff { from, to } => {
                    messages.push(ChatMessage::system(format!(
                        "Conversation transferred from '{from}' to '{to}'."
                    )));
                }
                TurnKind::HandoffDenied { from, to } => {
                    messages.push(ChatMessage::system(format!(
                        "Agent '{from}' attempted a hand-off to '{to}', which is not permitted. \
                         Continue without transferring."
                    )));
                }
            }
        }
        messages
    }
}
