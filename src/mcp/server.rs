//! MCP stdio server implementation
//!
//! Requests are read one line at a time and each is handled on its own task,
//! so a slow query does not hold up `ping` or `tools/list`. Responses are
//! funnelled through a single writer task to keep output lines whole.

use super::prompts::{get_prompt, list_prompts};
use super::resources::{list_resources, read_resource};
use super::tools::{get_tool_definitions, handle_tool_call};
use super::types::{
    CallToolParams, GetPromptParams, McpError, McpMessage, McpNotification, McpRequest,
    McpResponse, PromptsListResult, ReadResourceParams, ServerInfo, MCP_PROTOCOL_VERSION,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::StoreGateway;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

type InFlight = Arc<Mutex<HashMap<String, AbortHandle>>>;

/// MCP Server implementation
#[derive(Clone)]
pub struct McpServer {
    config: Arc<Config>,
    gateway: Arc<StoreGateway>,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(config: Config, gateway: Arc<StoreGateway>) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
        }
    }

    /// Run the MCP server loop over stdio
    pub async fn run(&self) -> Result<()> {
        info!("MCP server starting on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await?;
        info!("MCP server input closed");
        Ok(())
    }

    /// Serve newline-delimited JSON-RPC until `reader` reaches EOF
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_lines(writer, rx));
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        let mut lines = reader.split(b'\n');
        while let Some(raw) = lines.next_segment().await? {
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(e) => {
                    error!("Received a line that is not UTF-8: {}", e);
                    let response =
                        McpResponse::error(None, McpError::parse_error(format!("Parse error: {}", e)));
                    send(&tx, &response);
                    continue;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let value: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    let response =
                        McpResponse::error(None, McpError::parse_error(format!("Parse error: {}", e)));
                    send(&tx, &response);
                    continue;
                }
            };

            let id = value.get("id").cloned();
            let message: McpMessage = match serde_json::from_value(value) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Invalid message: {}", e);
                    let response =
                        McpResponse::error(id, McpError::invalid_request(format!("Invalid request: {}", e)));
                    send(&tx, &response);
                    continue;
                }
            };

            match message {
                McpMessage::Request(req) => self.spawn_request(req, &tx, &in_flight),
                McpMessage::Notification(notif) => self.handle_notification(notif, &in_flight),
                McpMessage::Response(resp) => {
                    warn!(id = ?resp.id, "Unexpected response message received");
                }
            }
        }

        // Requests still running keep their sender clones; the writer drains
        // until the last one finishes.
        drop(tx);
        writer_task
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

        Ok(())
    }

    fn spawn_request(&self, request: McpRequest, tx: &mpsc::UnboundedSender<String>, in_flight: &InFlight) {
        let key = request.id.as_ref().map(Value::to_string);
        let server = self.clone();
        let tx = tx.clone();
        let registry = in_flight.clone();

        // Hold the registry lock across spawn so a fast task cannot finish
        // before its abort handle is recorded.
        let mut pending = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let response = server.handle_request(request).await;
            if let Some(key) = &task_key {
                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                // A later request may have reused this id; leave its entry alone
                if registry.get(key).map(|h| h.id()) == Some(tokio::task::id()) {
                    registry.remove(key);
                }
            }
            send(&tx, &response);
        });

        if let Some(key) = key {
            if pending.insert(key.clone(), handle.abort_handle()).is_some() {
                warn!(request_id = %key, "Request id reused while an earlier request is in flight");
            }
        }
    }

    /// Handle an MCP request
    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            return McpResponse::error(
                id,
                McpError::invalid_request(format!("Unsupported jsonrpc version: {}", request.jsonrpc)),
            );
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => McpResponse::success(id, json!({})),
            "tools/list" => McpResponse::success(id, json!({ "tools": get_tool_definitions() })),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => {
                McpResponse::from_result(id, list_resources(&self.config, &self.gateway).await)
            }
            "resources/read" => self.handle_resources_read(id, request.params).await,
            "prompts/list" => McpResponse::from_result(
                id,
                Ok(PromptsListResult {
                    prompts: list_prompts(),
                }),
            ),
            "prompts/get" => self.handle_prompts_get(id, request.params),
            _ => McpResponse::error(id, McpError::method_not_found(&request.method)),
        }
    }

    /// Handle notifications (fire-and-forget)
    fn handle_notification(&self, notification: McpNotification, in_flight: &InFlight) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("Client initialized");
            }
            "notifications/cancelled" => {
                let Some(request_id) = notification.params.as_ref().and_then(|p| p.get("requestId"))
                else {
                    debug!("Cancellation without requestId ignored");
                    return;
                };

                let handle = in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&request_id.to_string());
                match handle {
                    Some(handle) => {
                        handle.abort();
                        info!(request_id = %request_id, "Request cancelled");
                    }
                    None => debug!(request_id = %request_id, "Cancelled request already finished"),
                }
            }
            _ => {
                debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> McpResponse {
        let server_info = ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        McpResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {
                        "listChanged": false
                    },
                    "resources": {
                        "subscribe": false,
                        "listChanged": false
                    },
                    "prompts": {
                        "listChanged": false
                    }
                },
                "serverInfo": server_info
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params: CallToolParams = match decode_params(params) {
            Ok(p) => p,
            Err(e) => return McpResponse::error(id, e),
        };

        debug!("Calling tool: {} with args: {:?}", params.name, params.arguments);

        let result = handle_tool_call(&params.name, &params.arguments, &self.config, &self.gateway).await;
        McpResponse::from_result(id, Ok(result))
    }

    /// Handle resources/read request
    async fn handle_resources_read(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params: ReadResourceParams = match decode_params(params) {
            Ok(p) => p,
            Err(e) => return McpResponse::error(id, e),
        };

        debug!("Reading resource: {}", params.uri);
        McpResponse::from_result(id, read_resource(&self.config, &self.gateway, &params.uri).await)
    }

    /// Handle prompts/get request
    fn handle_prompts_get(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let params: GetPromptParams = match decode_params(params) {
            Ok(p) => p,
            Err(e) => return McpResponse::error(id, e),
        };

        McpResponse::from_result(id, get_prompt(&self.config, &params.name, &params.arguments))
    }
}

fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, McpError> {
    let params = params.ok_or_else(|| McpError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(format!("Invalid params: {}", e)))
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &McpResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            debug!("Sending: {}", line);
            if tx.send(line).is_err() {
                warn!("Response dropped: output closed");
            }
        }
        Err(e) => error!("Failed to serialize response: {}", e),
    }
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryConnector, MemoryStore};
    use std::time::Duration;
    use tokio::io::{duplex, split, ReadHalf, WriteHalf, DuplexStream, Lines};
    use tokio::task::JoinHandle;

    struct Client {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        server: JoinHandle<Result<()>>,
    }

    impl Client {
        async fn send(&mut self, message: Value) {
            let line = format!("{}\n", message);
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn send_raw(&mut self, line: &[u8]) {
            self.writer.write_all(line).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Value> {
            let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for a response")
                .unwrap()?;
            Some(serde_json::from_str(&line).unwrap())
        }

        /// Close input, then collect everything the server still writes
        async fn finish(mut self) -> Vec<Value> {
            self.writer.shutdown().await.unwrap();
            let mut rest = Vec::new();
            while let Some(value) = self.recv().await {
                rest.push(value);
            }
            tokio_test::assert_ok!(self.server.await.unwrap());
            rest
        }
    }

    fn server(store: Arc<MemoryStore>) -> McpServer {
        let mut config = Config::default();
        config.database_name = "shop".to_string();
        let gateway = StoreGateway::new(&config, Arc::new(MemoryConnector::new(store)));
        McpServer::new(config, Arc::new(gateway))
    }

    fn fixture() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.insert(
            "shop",
            "orders",
            vec![json!({"_id": 1, "status": "active"}), json!({"_id": 2, "status": "closed"})],
        );
        Arc::new(store)
    }

    fn start(server: McpServer) -> Client {
        let (client_io, server_io) = duplex(64 * 1024);
        let (server_read, server_write) = split(server_io);
        let (client_read, client_write) = split(client_io);

        let handle = tokio::spawn(async move {
            server
                .serve(BufReader::new(server_read), server_write)
                .await
        });

        Client {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
            server: handle,
        }
    }

    fn request(id: u64, method: &str, params: Value) -> McpRequest {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_initialize_advertises_capabilities() {
        let response = server(fixture())
            .handle_request(request(1, "initialize", json!({})))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(result["capabilities"]["resources"].is_object());
        assert!(result["capabilities"]["prompts"].is_object());
        assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server(fixture())
            .handle_request(request(2, "tools/destroy", json!({})))
            .await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_tools_call_wraps_envelope() {
        let response = server(fixture())
            .handle_request(request(
                3,
                "tools/call",
                json!({"name": "count", "arguments": {"collection": "orders"}}),
            ))
            .await;

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let body: Value =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_tools_call_without_params() {
        let mut req = request(4, "tools/call", json!({}));
        req.params = None;
        let response = server(fixture()).handle_request(req).await;
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_resource_read_errors_are_rpc_errors() {
        let response = server(fixture())
            .handle_request(request(5, "resources/read", json!({"uri": "mongodb://other/orders"})))
            .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
        assert_eq!(error.data.unwrap()["kind"], "InvalidResourceAddress");
    }

    #[tokio::test]
    async fn test_prompts_over_rpc() {
        let server = server(fixture());

        let listed = server.handle_request(request(6, "prompts/list", json!({}))).await;
        assert_eq!(listed.result.unwrap()["prompts"].as_array().unwrap().len(), 3);

        let rendered = server
            .handle_request(request(
                7,
                "prompts/get",
                json!({"name": "analyzeCollection", "arguments": {"collection": "orders"}}),
            ))
            .await;
        let result = rendered.result.unwrap();
        assert_eq!(result["messages"][0]["role"], "user");
        assert_eq!(result["messages"][0]["content"]["type"], "text");

        let unknown = server
            .handle_request(request(8, "prompts/get", json!({"name": "nope"})))
            .await;
        assert_eq!(unknown.error.unwrap().data.unwrap()["kind"], "UnknownPrompt");
    }

    #[tokio::test]
    async fn test_stdio_round_trip() {
        let mut client = start(server(fixture()));

        client
            .send(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .await;
        let init = client.recv().await.unwrap();
        assert_eq!(init["id"], 1);
        assert!(init["result"]["serverInfo"].is_object());

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        client.send_raw(b"{not json\n").await;
        let parse_error = client.recv().await.unwrap();
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(parse_error["id"].is_null());

        client
            .send(json!({"jsonrpc": "2.0", "id": "list", "method": "tools/list"}))
            .await;
        let tools = client.recv().await.unwrap();
        assert_eq!(tools["id"], "list");
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 7);

        assert!(client.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_stop_the_loop() {
        let mut client = start(server(fixture()));

        client
            .send_raw(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\",\"x\":\"\xff\"}\n")
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
            .await;

        let parse_error = client.recv().await.unwrap();
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(parse_error["id"].is_null());

        let pong = client.recv().await.unwrap();
        assert_eq!(pong["id"], 2);
        assert_eq!(pong["result"], json!({}));

        assert!(client.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_echoes_id() {
        let mut client = start(server(fixture()));

        client.send(json!({"jsonrpc": "2.0", "id": 5})).await;
        let missing_method = client.recv().await.unwrap();
        assert_eq!(missing_method["id"], 5);
        assert_eq!(missing_method["error"]["code"], -32600);

        client
            .send(json!({"jsonrpc": "2.0", "id": "six", "method": 42}))
            .await;
        let bad_method = client.recv().await.unwrap();
        assert_eq!(bad_method["id"], "six");
        assert_eq!(bad_method["error"]["code"], -32600);

        // Responses from the client are logged and dropped
        client
            .send(json!({"jsonrpc": "2.0", "id": 9, "result": {}}))
            .await;

        assert!(client.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_reused_id_stays_cancellable() {
        let store = fixture();
        store.set_latency(Duration::from_millis(300));
        let mut client = start(server(store));

        // One store call for count, three for verifyConnection
        client
            .send(json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "count", "arguments": {"collection": "orders"}}
            }))
            .await;
        client
            .send(json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "verifyConnection", "arguments": {}}
            }))
            .await;

        let first = client.recv().await.unwrap();
        assert_eq!(first["id"], 7);
        let body: Value =
            serde_json::from_str(first["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["count"], 2);

        client
            .send(json!({
                "jsonrpc": "2.0", "method": "notifications/cancelled",
                "params": {"requestId": 7}
            }))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 8, "method": "ping"}))
            .await;

        let pong = client.recv().await.unwrap();
        assert_eq!(pong["id"], 8);

        assert!(client.finish().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_gets_no_response() {
        let store = fixture();
        store.set_latency(Duration::from_millis(500));
        let mut client = start(server(store));

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 10, "method": "tools/call",
                "params": {"name": "count", "arguments": {"collection": "orders"}}
            }))
            .await;
        client
            .send(json!({
                "jsonrpc": "2.0", "method": "notifications/cancelled",
                "params": {"requestId": 10, "reason": "user abort"}
            }))
            .await;
        client
            .send(json!({"jsonrpc": "2.0", "id": 11, "method": "ping"}))
            .await;

        let pong = client.recv().await.unwrap();
        assert_eq!(pong["id"], 11);
        assert_eq!(pong["result"], json!({}));

        assert!(client.finish().await.is_empty());
    }
}
