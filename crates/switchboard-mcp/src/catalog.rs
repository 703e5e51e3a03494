//! Shared tool catalog: server registration, lifecycle, and name routing.
//!
//! The catalog is the one structure shared by every session. Reads (resolve,
//! list, invoke) take shared locks; registration and degradation rebuild the
//! routing map into a fresh table and swap it under the write lock, so
//! readers only ever observe a complete old or new mapping.

use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_core::{Result, ServerId, SwitchboardError, ToolDescriptor, ToolOutcome};
use switchboard_metrics::{TimerGuard, TimingRecorder, OP_TOOL_INVOKE};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::config::LaunchSpec;
use crate::process::ProcessHandle;
use crate::server::{LifecycleState, ToolServer};
use crate::types::ToolCallResult;

/// Timeouts governing catalog-driven calls.
#[derive(Debug, Clone, Copy)]
pub struct CatalogTimeouts {
    pub handshake: Duration,
    pub call: Duration,
    pub shutdown_grace: Duration,
}

impl Default for CatalogTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(15),
            call: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

pub struct ToolCatalog {
    // Lock order: `routing` before `servers` wherever both are held.
    routing: RwLock<HashMap<String, ServerId>>,
    servers: RwLock<HashMap<ServerId, ToolServer>>,
    ready_counter: AtomicU64,
    timeouts: CatalogTimeouts,
    metrics: Arc<TimingRecorder>,
}

impl ToolCatalog {
    pub fn new(timeouts: CatalogTimeouts, metrics: Arc<TimingRecorder>) -> Self {
        Self {
            routing: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
            ready_counter: AtomicU64::new(0),
            timeouts,
            metrics,
        }
    }

    /// Create the server record and run its startup handshake. Registrations
    /// of distinct servers proceed concurrently; the slow part runs outside
    /// any lock. A failed handshake leaves the record `Degraded` and returns
    /// the startup error so the caller can decide whether to retry.
    pub async fn register(&self, id: impl Into<ServerId>, spec: LaunchSpec) -> Result<ServerId> {
        let id = id.into();
        {
            let mut servers = self.servers.write().await;
            if servers.contains_key(&id) {
                return Err(SwitchboardError::DuplicateServer(id));
            }
            servers.insert(id.clone(), ToolServer::new(id.clone(), spec));
        }

        self.start_server(&id).await?;
        Ok(id)
    }

    /// Resolve a tool name to the ready server currently advertising it.
    pub async fn resolve(&self, tool: &str) -> Result<ServerId> {
        self.routing
            .read()
            .await
            .get(tool)
            .cloned()
            .ok_or_else(|| SwitchboardError::UnknownTool(tool.to_string()))
    }

    /// Atomic snapshot of every routable tool, ordered by the owning
    /// server's ready order and then the server's own tool order. Disputed
    /// names appear once, under the server that claimed them first.
    pub async fn list_all(&self) -> Vec<ToolDescriptor> {
        let routing = self.routing.read().await;
        let servers = self.servers.read().await;

        let mut ready: Vec<&ToolServer> = servers
            .values()
            .filter(|s| s.state == LifecycleState::Ready)
            .collect();
        ready.sort_by_key(|s| s.ready_epoch);

        let mut descriptors = Vec::new();
        for server in ready {
            for tool in &server.tools {
                if routing.get(&tool.name) == Some(&server.id) {
                    descriptors.push(ToolDescriptor {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                        server: server.id.clone(),
                    });
                }
            }
        }
        descriptors
    }

    /// Lifecycle states of every registered server.
    pub async fn status(&self) -> BTreeMap<ServerId, LifecycleState> {
        let servers = self.servers.read().await;
        servers
            .iter()
            .map(|(id, server)| (id.clone(), server.state))
            .collect()
    }

    /// Checked invocation entry point. Records one timing sample per call;
    /// a vanished process terminates its server and drops its routes.
    pub async fn invoke(
        &self,
        server_id: &ServerId,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome> {
        let process = self.ready_process(server_id).await?;

        let result = {
            let _timer = TimerGuard::start(&self.metrics, OP_TOOL_INVOKE);
            process.invoke(tool, arguments, self.timeouts.call).await
        };

        match result {
            Ok(call_result) => Ok(outcome_from(call_result)),
            Err(SwitchboardError::ProcessUnavailable(_)) => {
                warn!("Server '{}' vanished during '{}' call", server_id, tool);
                self.terminate(server_id).await;
                Err(SwitchboardError::ProcessUnavailable(server_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-run `tools/list` on a ready server and fold the result back into
    /// the routing map. Repeating it is harmless.
    pub async fn refresh(&self, server_id: &ServerId) -> Result<()> {
        let process = self.ready_process(server_id).await?;

        match process.refresh_tools(self.timeouts.call).await {
            Ok(tools) => {
                {
                    let mut servers = self.servers.write().await;
                    if let Some(server) = servers.get_mut(server_id) {
                        server.tools = tools;
                    }
                }
                self.rebuild_routing().await;
                Ok(())
            }
            Err(SwitchboardError::ProcessUnavailable(_)) => {
                self.terminate(server_id).await;
                Err(SwitchboardError::ProcessUnavailable(server_id.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Start a degraded or terminated server again from its recorded launch
    /// spec. Meant for an external supervisor; the catalog never restarts
    /// servers on its own.
    pub async fn restart(&self, server_id: &ServerId) -> Result<()> {
        let old = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(server_id)
                .ok_or_else(|| SwitchboardError::ProcessUnavailable(server_id.clone()))?;
            if matches!(
                server.state,
                LifecycleState::Ready | LifecycleState::Initializing
            ) {
                warn!("Server '{}' is {}, not restarting", server_id, server.state);
                return Ok(());
            }
            server.ready_epoch = None;
            server.tools.clear();
            server.process.take()
        };

        if let Some(process) = old {
            process.shutdown(self.timeouts.shutdown_grace).await;
        }

        self.start_server(server_id).await
    }

    /// Shut every server down gracefully and clear the routing map.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all tool servers");

        let processes: Vec<Arc<ProcessHandle>> = {
            let mut servers = self.servers.write().await;
            servers
                .values_mut()
                .filter_map(|server| {
                    if matches!(
                        server.state,
                        LifecycleState::Ready | LifecycleState::Degraded
                    ) {
                        transition(server, LifecycleState::Terminated);
                    }
                    server.process.take()
                })
                .collect()
        };

        for process in &processes {
            process.shutdown(self.timeouts.shutdown_grace).await;
        }

        self.routing.write().await.clear();
    }

    /// Spawn + handshake for an already-recorded server. Shared by
    /// `register` and `restart`.
    async fn start_server(&self, id: &ServerId) -> Result<()> {
        let spec = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(id)
                .ok_or_else(|| SwitchboardError::ProcessUnavailable(id.clone()))?;
            transition(server, LifecycleState::Initializing);
            server.launch.clone()
        };

        let process = match ProcessHandle::spawn(id.clone(), &spec) {
            Ok(process) => Arc::new(process),
            Err(e) => {
                self.set_state(id, LifecycleState::Degraded).await;
                return Err(e);
            }
        };

        match process.handshake(self.timeouts.handshake).await {
            Ok(tools) => {
                let epoch = self.ready_counter.fetch_add(1, Ordering::SeqCst);
                {
                    let mut servers = self.servers.write().await;
                    if let Some(server) = servers.get_mut(id) {
                        server.tools = tools;
                        server.process = Some(process);
                        server.ready_epoch = Some(epoch);
                        transition(server, LifecycleState::Ready);
                    }
                }
                self.rebuild_routing().await;
                Ok(())
            }
            Err(e) => {
                // Dropping the handle kills the half-initialized child.
                drop(process);
                self.set_state(id, LifecycleState::Degraded).await;
                Err(e)
            }
        }
    }

    async fn ready_process(&self, server_id: &ServerId) -> Result<Arc<ProcessHandle>> {
        let servers = self.servers.read().await;
        let server = servers
            .get(server_id)
            .ok_or_else(|| SwitchboardError::ProcessUnavailable(server_id.clone()))?;
        if server.state != LifecycleState::Ready {
            return Err(SwitchboardError::ProcessUnavailable(server_id.clone()));
        }
        server
            .process
            .clone()
            .ok_or_else(|| SwitchboardError::ProcessUnavailable(server_id.clone()))
    }

    async fn terminate(&self, id: &ServerId) {
        self.set_state(id, LifecycleState::Terminated).await;
        self.rebuild_routing().await;
    }

    async fn set_state(&self, id: &ServerId, next: LifecycleState) {
        let mut servers = self.servers.write().await;
        if let Some(server) = servers.get_mut(id) {
            transition(server, next);
        }
    }

    /// Rebuild the tool-name routing table from the current ready servers
    /// and swap it in atomically.
    async fn rebuild_routing(&self) {
        let mut routing = self.routing.write().await;
        let servers = self.servers.read().await;

        let mut ready: Vec<&ToolServer> = servers
            .values()
            .filter(|s| s.state == LifecycleState::Ready)
            .collect();
        ready.sort_by_key(|s| s.ready_epoch);

        let mut map = HashMap::new();
        for server in ready {
            for tool in &server.tools {
                match map.entry(tool.name.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(server.id.clone());
                    }
                    Entry::Occupied(winner) => {
                        warn!(
                            "Tool name conflict: '{}' from '{}' already provided by '{}', keeping the first",
                            tool.name,
                            server.id,
                            winner.get()
                        );
                    }
                }
            }
        }

        *routing = map;
    }
}

fn transition(server: &mut ToolServer, next: LifecycleState) {
    if server.state != next {
        info!("Server '{}' transitioned {} -> {}", server.id, server.state, next);
        server.state = next;
    }
}

fn outcome_from(result: ToolCallResult) -> ToolOutcome {
    let text = result.text();
    if result.is_error() {
        ToolOutcome::Error { message: text }
    } else {
        ToolOutcome::Success { content: text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentItem;

    #[test]
    fn successful_call_result_maps_to_success() {
        let outcome = outcome_from(ToolCallResult {
            content: vec![ContentItem::text("8")],
            is_error: None,
        });
        assert_eq!(
            outcome,
            ToolOutcome::Success {
                content: "8".to_string()
            }
        );
    }

    #[test]
    fn flagged_call_result_maps_to_error() {
        let outcome = outcome_from(ToolCallResult {
            content: vec![ContentItem::text("Error: Division by zero")],
            is_error: Some(true),
        });
        assert!(outcome.is_error());
        assert_eq!(outcome.text(), "Error: Division by zero");
    }

    #[tokio::test]
    async fn empty_catalog_resolves_nothing() {
        let catalog = ToolCatalog::new(CatalogTimeouts::default(), Arc::new(TimingRecorder::new()));
        let err = catalog.resolve("anything").await.unwrap_err();
        assert!(matches!(err, SwitchboardError::UnknownTool(_)));
        assert!(catalog.list_all().await.is_empty());
        assert!(catalog.status().await.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_missing_binary() {
        let catalog = ToolCatalog::new(CatalogTimeouts::default(), Arc::new(TimingRecorder::new()));
        let spec = LaunchSpec {
            command: "/nonexistent/definitely-not-a-binary".to_string(),
            args: vec![],
            env: Default::default(),
            disabled: false,
        };

        let err = catalog.register("ghost", spec).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::Startup { .. }));

        let status = catalog.status().await;
        assert_eq!(
            status.get(&ServerId::from("ghost")),
            Some(&LifecycleState::Degraded)
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let catalog = ToolCatalog::new(CatalogTimeouts::default(), Arc::new(TimingRecorder::new()));
        let spec = LaunchSpec {
            command: "/nonexistent/definitely-not-a-binary".to_string(),
            args: vec![],
            env: Default::default(),
            disabled: false,
        };

        let _ = catalog.register("twice", spec.clone()).await;
        let err = catalog.register("twice", spec).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateServer(_)));
    }

    #[tokio::test]
    async fn invoking_unknown_server_is_unavailable() {
        let catalog = ToolCatalog::new(CatalogTimeouts::default(), Arc::new(TimingRecorder::new()));
        let err = catalog
            .invoke(&ServerId::from("ghost"), "add", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::ProcessUnavailable(_)));
    }
}
