//! MCP integration for Switchboard: the line-delimited JSON-RPC transport,
//! tool server subprocess lifecycle, and the shared tool catalog that routes
//! tool names to the servers advertising them.

pub mod catalog;
pub mod config;
pub mod process;
pub mod server;
pub mod transport;
pub mod types;

pub use catalog::{CatalogTimeouts, ToolCatalog};
pub use config::{LaunchSpec, ServersFile};
pub use process::ProcessHandle;
pub use server::{LifecycleState, ToolServer};
pub use transport::{PendingResponse, RpcConnection};
pub use types::{
    ContentItem, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, ToolsCapability,
};
