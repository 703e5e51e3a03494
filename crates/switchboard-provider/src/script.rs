//! Deterministic provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use switchboard_core::Result;

use crate::{CompletionRequest, ModelAction, ModelProvider};

const EXHAUSTED_REPLY: &str = "I have nothing further to add.";

/// Replays a fixed queue of [`ModelAction`]s, one per `complete` call, and
/// records every request it sees. Once the queue runs dry it keeps
/// answering with a fixed final message, so a runaway loop terminates
/// instead of erroring.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ModelAction>>,
    exhausted_reply: String,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(actions: impl IntoIterator<Item = ModelAction>) -> Self {
        Self {
            script: Mutex::new(actions.into_iter().collect()),
            exhausted_reply: EXHAUSTED_REPLY.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Replace the reply given after the script runs out.
    pub fn exhausted_with(mut self, reply: impl Into<String>) -> Self {
        self.exhausted_reply = reply.into();
        self
    }

    /// Every completion request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelAction> {
        self.seen.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ModelAction::Final {
            text: self.exhausted_reply.clone(),
        }))
    }
}
