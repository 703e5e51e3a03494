//! Launch specifications for stdio tool servers.
//!
//! Server tables use the conventional `mcpServers` file format, so existing
//! server definition files can be pointed at directly. Parsing accepts YAML
//! or JSON content.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use switchboard_core::{Result, SwitchboardError};

/// How to launch one tool server subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
}

/// A `mcpServers`-format table of named launch specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersFile {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, LaunchSpec>,
}

impl ServersFile {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SwitchboardError::Config(format!("invalid servers file: {}", e)))
    }

    /// Merge another table into this one; entries from `other` win.
    pub fn merge(&mut self, other: ServersFile) {
        for (name, spec) in other.mcp_servers {
            self.mcp_servers.insert(name, spec);
        }
    }

    /// Specs that are not marked disabled.
    pub fn enabled(&self) -> HashMap<String, LaunchSpec> {
        self.mcp_servers
            .iter()
            .filter(|(_, spec)| !spec.disabled)
            .map(|(name, spec)| (name.clone(), spec.clone()))
            .collect()
    }
}
