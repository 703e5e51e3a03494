//! Line-delimited JSON-RPC 2.0 connection with request/response correlation.
//!
//! One dedicated reader task per connection parses incoming lines and fans
//! responses out to waiting callers by request id, so sends to one peer are
//! logically serialized while sends to different peers proceed in parallel.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_core::{Result, ServerId, SwitchboardError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Handle to an in-flight request. Dropping it abandons the response.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    peer: ServerId,
    rx: oneshot::Receiver<JsonRpcResponse>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the correlated response. Fails with `ProcessUnavailable` if
    /// the connection is torn down first.
    pub async fn wait(self) -> Result<JsonRpcResponse> {
        self.rx
            .await
            .map_err(|_| SwitchboardError::ProcessUnavailable(self.peer))
    }
}

/// A JSON-RPC connection over an arbitrary stream pair.
pub struct RpcConnection {
    peer: ServerId,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl RpcConnection {
    pub fn new<R, W>(peer: ServerId, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(receive_loop(
            peer.clone(),
            BufReader::new(reader),
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Self {
            peer,
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            connected,
            reader: reader_task,
        }
    }

    pub fn peer(&self) -> &ServerId {
        &self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Next request id; unique for the lifetime of this connection.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a waiter for the next request id and write the request line.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<PendingResponse> {
        if !self.is_connected() {
            return Err(SwitchboardError::ProcessUnavailable(self.peer.clone()));
        }

        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        // The reader may have drained the pending map between the insert and
        // the write; re-check so the caller fails fast instead of timing out.
        if !self.is_connected() {
            self.pending.lock().await.remove(&id);
            return Err(SwitchboardError::ProcessUnavailable(self.peer.clone()));
        }

        Ok(PendingResponse {
            id,
            peer: self.peer.clone(),
            rx,
        })
    }

    /// Send + await with a deadline. A timed-out waiter is abandoned so its
    /// late reply, if one ever arrives, is discarded as unmatched.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<JsonRpcResponse> {
        let pending = self.send(method, params).await?;
        let id = pending.id();

        match timeout(deadline, pending.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SwitchboardError::Timeout {
                    operation: method.to_string(),
                    ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification line (no id, no reply expected).
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_line(&notification).await
    }

    /// Close the write half, signalling EOF to the peer. The reader keeps
    /// draining until the peer closes its own end.
    pub async fn close_writer(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(SwitchboardError::Io)?;
        Ok(())
    }

    async fn write_line(&self, payload: &impl serde::Serialize) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        debug!("Sending to '{}': {}", self.peer, json);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.write_failed(e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| self.write_failed(e))?;
        writer.flush().await.map_err(|e| self.write_failed(e))?;
        Ok(())
    }

    fn write_failed(&self, e: std::io::Error) -> SwitchboardError {
        debug!("Write to '{}' failed: {}", self.peer, e);
        self.connected.store(false, Ordering::SeqCst);
        SwitchboardError::ProcessUnavailable(self.peer.clone())
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn receive_loop<R>(
    peer: ServerId,
    mut reader: BufReader<R>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection to '{}' reached EOF", peer);
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    dispatch_line(&peer, trimmed, &pending).await;
                }
            }
            Err(e) => {
                error!("Read error on connection to '{}': {}", peer, e);
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the senders fails every waiter with ProcessUnavailable.
    pending.lock().await.clear();
}

async fn dispatch_line(peer: &ServerId, line: &str, pending: &PendingMap) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed line from '{}': {}", peer, e);
            return;
        }
    };

    if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        warn!("Dropping line from '{}' without a jsonrpc 2.0 marker", peer);
        return;
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        // Server-initiated message; nothing on this side awaits it.
        debug!("Ignoring server-initiated '{}' from '{}'", method, peer);
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(response) => response,
        Err(e) => {
            warn!("Dropping undecodable response from '{}': {}", peer, e);
            return;
        }
    };

    let Some(id) = response.request_id() else {
        warn!(
            "Discarding response from '{}' with non-numeric id {}",
            peer, response.id
        );
        return;
    };

    match pending.lock().await.remove(&id) {
        Some(waiter) => {
            // The receiver may already be gone if the call timed out.
            let _ = waiter.send(response);
        }
        None => {
            warn!(
                "Discarding response from '{}' for unknown request id {}",
                peer, id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream};

    fn connect(stream: DuplexStream) -> RpcConnection {
        let (reader, writer) = split(stream);
        RpcConnection::new(ServerId::from("test"), reader, writer)
    }

    async fn write_json(writer: &mut (impl AsyncWrite + Unpin), value: Value) {
        writer
            .write_all(format!("{}\n", value).as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn call_matches_response_by_id() {
        let (client, server) = duplex(4096);
        let conn = connect(client);

        let (server_read, mut server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let id = request["id"].as_u64().unwrap();
                write_json(
                    &mut server_write,
                    json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}}),
                )
                .await;
            }
        });

        let response = conn
            .call("ping", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn malformed_and_unmatched_lines_are_dropped() {
        let (client, server) = duplex(4096);
        let conn = connect(client);

        let (server_read, mut server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let id = serde_json::from_str::<Value>(&line).unwrap()["id"]
                .as_u64()
                .unwrap();

            // Garbage, a wrong-version line, and a response nobody asked for
            // must all be dropped without disturbing the real reply.
            server_write.write_all(b"not json at all\n").await.unwrap();
            write_json(
                &mut server_write,
                json!({"jsonrpc": "1.0", "id": id, "result": {}}),
            )
            .await;
            write_json(
                &mut server_write,
                json!({"jsonrpc": "2.0", "id": 9999, "result": {}}),
            )
            .await;
            write_json(
                &mut server_write,
                json!({"jsonrpc": "2.0", "id": id, "result": {"answer": 42}}),
            )
            .await;
        });

        let response = conn
            .call("ping", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.result.unwrap()["answer"], 42);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn eof_fails_pending_waiters() {
        let (client, server) = duplex(4096);
        let conn = connect(client);

        let (server_read, server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let _ = lines.next_line().await;
            drop(lines);
            drop(server_write);
        });

        let err = conn
            .call("ping", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::ProcessUnavailable(_)));
        assert!(!conn.is_connected());

        // Subsequent sends fail fast instead of queueing.
        let err = conn.send("ping", None).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::ProcessUnavailable(_)));
    }

    #[tokio::test]
    async fn timeout_abandons_waiter_and_discards_late_reply() {
        let (client, server) = duplex(4096);
        let conn = connect(client);

        let (server_read, mut server_write) = split(server);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            let first_id = serde_json::from_str::<Value>(&first).unwrap()["id"]
                .as_u64()
                .unwrap();

            let second = lines.next_line().await.unwrap().unwrap();
            let second_id = serde_json::from_str::<Value>(&second).unwrap()["id"]
                .as_u64()
                .unwrap();

            // Answer the abandoned request first, then the live one.
            for id in [first_id, second_id] {
                write_json(
                    &mut server_write,
                    json!({"jsonrpc": "2.0", "id": id, "result": {"id": id}}),
                )
                .await;
            }
        });

        let err = conn
            .call("slow", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Timeout { .. }));

        let response = conn
            .call("fast", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(response.request_id().is_some());
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let (client, _server) = duplex(4096);
        let conn = connect(client);

        let first = conn.send("a", None).await.unwrap();
        let second = conn.send("b", None).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn notification_carries_no_id() {
        let (client, server) = duplex(4096);
        let conn = connect(client);

        conn.send_notification("notifications/initialized", Some(json!({})))
            .await
            .unwrap();

        let (server_read, _server_write) = split(server);
        let line = BufReader::new(server_read)
            .lines()
            .next_line()
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "notifications/initialized");
    }
}
