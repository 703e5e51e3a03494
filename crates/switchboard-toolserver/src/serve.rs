//! The stdio serve loop: line-delimited JSON-RPC requests in, replies out.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use switchboard_core::Result;
use switchboard_mcp::types::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION};
use switchboard_mcp::{
    ContentItem, InitializeResult, JsonRpcResponse, ListToolsResult, ServerCapabilities,
    ServerInfo, ToolCallParams, ToolCallResult, ToolsCapability,
};

use crate::{CallReply, Toolset};

/// Failure-injection switches, all off in normal service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Answer `initialize` with an error.
    pub reject_initialize: bool,
    /// Read requests but never write a reply.
    pub mute: bool,
    /// Return (exiting the process) after answering this many `tools/call`s.
    pub exit_after_calls: Option<u64>,
}

/// Serve one toolset over a reader/writer pair until EOF. Undecodable
/// request lines are logged and skipped; requests without an id are
/// notifications and never get a reply.
pub async fn serve<R, W>(
    toolset: Arc<dyn Toolset>,
    reader: R,
    writer: W,
    options: ServeOptions,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut writer = writer;
    let mut calls_answered: u64 = 0;

    info!("Tool server '{}' listening", toolset.name());

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!("Dropping undecodable request line: {}", err);
                continue;
            }
        };

        let method = request
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let is_call = method == "tools/call";

        let response = match request.get("id").cloned() {
            None => {
                debug!("Notification: {}", method);
                None
            }
            Some(id) => Some(answer(toolset.as_ref(), id, &method, params, &options)),
        };

        if let Some(response) = response {
            if options.mute {
                debug!("Muted; dropping reply to '{}'", method);
            } else {
                let mut reply = serde_json::to_string(&response)?;
                reply.push('\n');
                writer.write_all(reply.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        if is_call {
            calls_answered += 1;
            if options
                .exit_after_calls
                .is_some_and(|limit| calls_answered >= limit)
            {
                info!("Call limit reached after {} calls, exiting", calls_answered);
                return Ok(());
            }
        }
    }
    Ok(())
}

fn answer(
    toolset: &dyn Toolset,
    id: Value,
    method: &str,
    params: Value,
    options: &ServeOptions,
) -> JsonRpcResponse {
    match method {
        "initialize" => {
            if options.reject_initialize {
                return JsonRpcResponse::failure(id, INTERNAL_ERROR, "initialization disabled");
            }
            let result = InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: Some(false),
                    }),
                },
                server_info: Some(ServerInfo {
                    name: format!("{}-server", toolset.name()),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }),
            };
            success(id, &result)
        }
        "tools/list" => success(
            id,
            &ListToolsResult {
                tools: toolset.tools(),
            },
        ),
        "tools/call" => {
            let params: ToolCallParams = match serde_json::from_value(params) {
                Ok(params) => params,
                Err(err) => {
                    return JsonRpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        format!("Invalid parameters: {err}"),
                    )
                }
            };
            match toolset.call(&params.name, &params.arguments) {
                CallReply::Reply { text, is_error } => success(
                    id,
                    &ToolCallResult {
                        content: vec![ContentItem::text(text)],
                        is_error: is_error.then_some(true),
                    },
                ),
                CallReply::Failure { code, message } => {
                    JsonRpcResponse::failure(id, code, message)
                }
            }
        }
        other => {
            JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
        }
    }
}

fn success<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => JsonRpcResponse::failure(id, INTERNAL_ERROR, format!("Internal error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Calculator;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    struct Client {
        writer: DuplexStream,
        reader: tokio::io::Lines<BufReader<DuplexStream>>,
    }

    fn start(options: ServeOptions) -> Client {
        let (client_side, server_read) = duplex(16 * 1024);
        let (server_write, response_side) = duplex(16 * 1024);
        tokio::spawn(serve(
            Arc::new(Calculator),
            server_read,
            server_write,
            options,
        ));
        Client {
            writer: client_side,
            reader: BufReader::new(response_side).lines(),
        }
    }

    impl Client {
        async fn send(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.reader.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    #[tokio::test]
    async fn full_handshake_and_call() {
        let mut client = start(ServeOptions::default());

        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(
            reply["result"]["serverInfo"]["name"],
            "calculator-server"
        );

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;

        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 8);

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "add", "arguments": {"a": 2, "b": 2}}
            }))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["result"]["content"][0]["text"], "2 + 2 = 4");
        assert!(reply["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn in_band_error_sets_the_flag() {
        let mut client = start(ServeOptions::default());
        client
            .send(json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "divide", "arguments": {"a": 1, "b": 0}}
            }))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["result"]["isError"], true);
        assert!(reply["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("zero"));
    }

    #[tokio::test]
    async fn reject_initialize_answers_with_an_error() {
        let mut client = start(ServeOptions {
            reject_initialize: true,
            ..Default::default()
        });
        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["error"]["code"], INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let mut client = start(ServeOptions::default());
        client
            .send(json!({"jsonrpc": "2.0", "id": 5, "method": "resources/list"}))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let mut client = start(ServeOptions::default());
        client.writer.write_all(b"not json\n").await.unwrap();
        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["id"], 1);
    }

    #[tokio::test]
    async fn exit_after_calls_closes_the_stream() {
        let mut client = start(ServeOptions {
            exit_after_calls: Some(1),
            ..Default::default()
        });
        client
            .send(json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {"name": "abs", "arguments": {"value": -3}}
            }))
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["result"]["content"][0]["text"], "|-3| = 3");

        // Serve returned after the first call, so the stream is closed.
        let eof = client.reader.next_line().await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn muted_server_never_answers() {
        let mut client = start(ServeOptions {
            mute: true,
            ..Default::default()
        });
        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await;
        let reply = tokio::time::timeout(Duration::from_millis(100), client.recv()).await;
        assert!(reply.is_err());
    }
}
