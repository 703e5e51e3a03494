//! Application configuration for Switchboard.
//!
//! One YAML document describes the model provider, session limits, the tool
//! server table, and the agent roster. Server tables can also live in
//! separate `mcpServers`-format files referenced under `server_files`.

mod env_substitution;

pub use env_substitution::{substitute_env_vars, substitute_in_string};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use switchboard_core::{Result, SwitchboardError};
use switchboard_mcp::{LaunchSpec, ServersFile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub servers: HashMap<String, LaunchSpec>,
    #[serde(default)]
    pub server_files: Vec<PathBuf>,
    pub agents: HashMap<String, AgentSettings>,
    pub routing: RoutingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_step_budget")]
    pub step_budget: u32,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub instructions: String,
    /// Tool servers this agent may call into; an empty list means no tools.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Agents this one may hand a session off to.
    #[serde(default)]
    pub handoffs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub default_agent: String,
}

impl AppConfig {
    /// Parse and validate configuration text after environment substitution.
    /// Entries under `server_files` are left unresolved; use
    /// [`AppConfig::load`] to fold them in.
    pub fn from_str(content: &str) -> Result<Self> {
        let substituted = substitute_in_string(content)?;
        let config: AppConfig = serde_yaml::from_str(&substituted)
            .map_err(|e| SwitchboardError::Config(format!("failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, merge any referenced server files into the inline
    /// table (later files win), and validate the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwitchboardError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_str(&content)?;

        // Relative server-file paths are resolved against the config file.
        let base_dir = path.parent().map(PathBuf::from).unwrap_or_default();
        let files = std::mem::take(&mut config.server_files);
        for file in files {
            let file_path = if file.is_absolute() {
                file
            } else {
                base_dir.join(file)
            };
            let table = load_servers_file(&file_path)?;
            for (name, spec) in table.mcp_servers {
                config.servers.insert(name, spec);
            }
        }

        config.validate_server_references()?;
        Ok(config)
    }

    /// Launch specs that are not marked disabled.
    pub fn enabled_servers(&self) -> HashMap<String, LaunchSpec> {
        self.servers
            .iter()
            .filter(|(_, spec)| !spec.disabled)
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.provider.base_url.is_empty() {
            return Err(SwitchboardError::Config(
                "provider.base_url cannot be empty".into(),
            ));
        }
        if self.provider.model.is_empty() {
            return Err(SwitchboardError::Config(
                "provider.model cannot be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(SwitchboardError::Config(
                "provider.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if self.session.step_budget == 0 {
            return Err(SwitchboardError::Config(
                "session.step_budget must be positive".into(),
            ));
        }
        if self.session.message_limit == 0 {
            return Err(SwitchboardError::Config(
                "session.message_limit must be positive".into(),
            ));
        }
        if self.agents.is_empty() {
            return Err(SwitchboardError::Config(
                "at least one agent must be configured".into(),
            ));
        }
        for (name, agent) in &self.agents {
            if agent.instructions.trim().is_empty() {
                return Err(SwitchboardError::Config(format!(
                    "agent '{}' has empty instructions",
                    name
                )));
            }
        }
        if !self.agents.contains_key(&self.routing.default_agent) {
            return Err(SwitchboardError::Config(format!(
                "routing.default_agent '{}' is not a configured agent",
                self.routing.default_agent
            )));
        }
        Ok(())
    }

    /// Check that every agent's server allow-list names a configured server.
    /// Call once the servers table is complete.
    pub fn validate_server_references(&self) -> Result<()> {
        for (name, agent) in &self.agents {
            for server in &agent.servers {
                if !self.servers.contains_key(server) {
                    return Err(SwitchboardError::Config(format!(
                        "agent '{}' references unknown server '{}'",
                        name, server
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            tool_timeout_ms: default_tool_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            provider_timeout_ms: default_provider_timeout_ms(),
            message_limit: default_message_limit(),
        }
    }
}

fn load_servers_file(path: &Path) -> Result<ServersFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SwitchboardError::Config(format!(
            "failed to read servers file {}: {}",
            path.display(),
            e
        ))
    })?;
    let substituted = substitute_in_string(&content)?;
    ServersFile::parse(&substituted)
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    4096
}
fn default_step_budget() -> u32 {
    10
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_handshake_timeout_ms() -> u64 {
    15_000
}
fn default_provider_timeout_ms() -> u64 {
    120_000
}
fn default_message_limit() -> usize {
    2000
}
