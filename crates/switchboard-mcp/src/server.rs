//! Tool server lifecycle records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use switchboard_core::ServerId;

use crate::config::LaunchSpec;
use crate::process::ProcessHandle;
use crate::types::McpTool;

/// Lifecycle of a tool server process. The owning catalog is the only
/// writer; only `Ready` servers are routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Initializing,
    Ready,
    Degraded,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::NotStarted => "not_started",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// One registered tool server: its launch description, current state,
/// advertised tools, and (once spawned) the process handle.
#[derive(Debug)]
pub struct ToolServer {
    pub id: ServerId,
    pub launch: LaunchSpec,
    pub state: LifecycleState,
    pub tools: Vec<McpTool>,
    /// Monotonic order in which the server reached `Ready`; routing rebuilds
    /// iterate in this order so the first claimant keeps a disputed name.
    pub ready_epoch: Option<u64>,
    pub process: Option<Arc<ProcessHandle>>,
}

impl ToolServer {
    pub fn new(id: ServerId, launch: LaunchSpec) -> Self {
        Self {
            id,
            launch,
            state: LifecycleState::NotStarted,
            tools: Vec::new(),
            ready_epoch: None,
            process: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_state_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");

        let state: LifecycleState = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(state, LifecycleState::Ready);
    }

    #[test]
    fn new_server_starts_unstarted() {
        let server = ToolServer::new(
            ServerId::from("calc"),
            LaunchSpec {
                command: "switchboard-toolserver".to_string(),
                args: vec!["calculator".to_string()],
                env: Default::default(),
                disabled: false,
            },
        );
        assert_eq!(server.state, LifecycleState::NotStarted);
        assert!(server.ready_epoch.is_none());
        assert!(server.process.is_none());
    }
}
