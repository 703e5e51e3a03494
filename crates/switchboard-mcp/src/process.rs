//! Subprocess wiring for stdio-based MCP servers.

use serde_json::Value;
use std::process::Stdio;
use switchboard_core::{Result, ServerId, SwitchboardError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::LaunchSpec;
use crate::transport::RpcConnection;
use crate::types::{
    InitializeParams, InitializeResult, ListToolsResult, McpTool, ToolCallParams, ToolCallResult,
};

/// A spawned tool server process plus its RPC connection. The child is
/// killed when the handle is dropped, so an abandoned handle cannot leak a
/// subprocess.
pub struct ProcessHandle {
    server: ServerId,
    child: Mutex<Option<Child>>,
    connection: RpcConnection,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("server", &self.server)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ProcessHandle {
    /// Spawn the subprocess described by `spec` and wire its stdio into an
    /// RPC connection. A side task drains stderr into debug logs so the
    /// child can never block on a full pipe.
    pub fn spawn(server: ServerId, spec: &LaunchSpec) -> Result<Self> {
        info!(
            "Spawning tool server '{}': {} {:?}",
            server, spec.command, spec.args
        );

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| SwitchboardError::Startup {
            server: server.clone(),
            reason: format!("failed to spawn '{}': {}", spec.command, e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SwitchboardError::Startup {
            server: server.clone(),
            reason: "child stdin unavailable".to_string(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwitchboardError::Startup {
                server: server.clone(),
                reason: "child stdout unavailable".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SwitchboardError::Startup {
                server: server.clone(),
                reason: "child stderr unavailable".to_string(),
            })?;

        let stderr_server = server.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    debug!("[{} stderr] {}", stderr_server, trimmed);
                }
            }
        });

        let connection = RpcConnection::new(server.clone(), stdout, stdin);

        Ok(Self {
            server,
            child: Mutex::new(Some(child)),
            connection,
        })
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn is_alive(&self) -> bool {
        self.connection.is_connected()
    }

    /// Run the MCP handshake: `initialize`, the `notifications/initialized`
    /// acknowledgement, then `tools/list`. Every failure mode — error reply,
    /// timeout, early exit — surfaces as a startup failure.
    pub async fn handshake(&self, deadline: Duration) -> Result<Vec<McpTool>> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self
            .connection
            .call("initialize", Some(params), deadline)
            .await
            .map_err(|e| self.startup_error(e))?;

        if let Some(error) = response.error {
            return Err(SwitchboardError::Startup {
                server: self.server.clone(),
                reason: format!(
                    "initialize rejected (code {}): {}",
                    error.code, error.message
                ),
            });
        }

        let init: InitializeResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| SwitchboardError::Startup {
                server: self.server.clone(),
                reason: format!("undecodable initialize result: {}", e),
            })?;

        if let Some(info) = &init.server_info {
            info!(
                "Server '{}' is {} v{} (protocol {})",
                self.server, info.name, info.version, init.protocol_version
            );
        } else {
            info!(
                "Server '{}' initialized (protocol {})",
                self.server, init.protocol_version
            );
        }

        self.connection
            .send_notification("notifications/initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| self.startup_error(e))?;

        let tools = self
            .fetch_tools(deadline)
            .await
            .map_err(|e| self.startup_error(e))?;
        info!("Server '{}' advertises {} tools", self.server, tools.len());
        Ok(tools)
    }

    /// Re-query the advertised tools. Safe to repeat on a ready server.
    pub async fn refresh_tools(&self, deadline: Duration) -> Result<Vec<McpTool>> {
        debug!("Refreshing tools on '{}'", self.server);
        self.fetch_tools(deadline).await
    }

    /// Invoke a tool via `tools/call`. A JSON-RPC error reply becomes
    /// `ToolExecution`; in-band tool failures come back inside the result
    /// for the caller to interpret.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<ToolCallResult> {
        debug!("Calling tool '{}' on '{}'", tool, self.server);

        let params = ToolCallParams {
            name: tool.to_string(),
            arguments,
        };
        let response = self
            .connection
            .call("tools/call", Some(serde_json::to_value(params)?), deadline)
            .await?;

        if let Some(error) = response.error {
            return Err(SwitchboardError::ToolExecution {
                tool: tool.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        let result: ToolCallResult =
            serde_json::from_value(response.result.ok_or_else(|| {
                SwitchboardError::Protocol(format!(
                    "tools/call response for '{}' missing result",
                    tool
                ))
            })?)?;
        Ok(result)
    }

    /// Close stdin and give the process a grace period to exit on its own
    /// before killing it. Calling this on an already-finished process is a
    /// no-op.
    pub async fn shutdown(&self, grace: Duration) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        let _ = self.connection.close_writer().await;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Server '{}' exited with {}", self.server, status);
            }
            Ok(Err(e)) => {
                warn!("Failed to reap server '{}': {}", self.server, e);
            }
            Err(_) => {
                warn!(
                    "Server '{}' did not exit within {:?}, killing",
                    self.server, grace
                );
                if let Err(e) = child.kill().await {
                    error!("Failed to kill server '{}': {}", self.server, e);
                }
            }
        }
    }

    async fn fetch_tools(&self, deadline: Duration) -> Result<Vec<McpTool>> {
        let response = self.connection.call("tools/list", None, deadline).await?;

        if let Some(error) = response.error {
            return Err(SwitchboardError::Protocol(format!(
                "tools/list failed (code {}): {}",
                error.code, error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.ok_or_else(
            || SwitchboardError::Protocol("tools/list response missing result".to_string()),
        )?)?;
        Ok(result.tools)
    }

    fn startup_error(&self, cause: SwitchboardError) -> SwitchboardError {
        match cause {
            already @ SwitchboardError::Startup { .. } => already,
            other => SwitchboardError::Startup {
                server: self.server.clone(),
                reason: other.to_string(),
            },
        }
    }
}
