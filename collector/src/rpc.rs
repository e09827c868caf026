//! JSON-RPC client for bitcoind-compatible nodes.
//!
//! Speaks JSON-RPC 1.0 over HTTP POST with basic auth and exposes the handful
//! of calls chain sync needs through the [`LedgerRpc`] trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{CollectorError, Result};

const REQUEST_ID: &str = "chain-collector";

/// Remote ledger operations consumed by chain sync.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Height and hash of the node's best block.
    async fn get_last_block(&self) -> Result<(u64, String)>;

    async fn get_block_hash(&self, height: u64) -> Result<String>;

    async fn get_block(&self, hash: &str) -> Result<RpcBlock>;

    /// Raw `getblockstats` result, metric name to value (or `[value, ...]`).
    async fn get_block_stats(&self, height: u64) -> Result<RawBlockStats>;
}

pub type RawBlockStats = HashMap<String, serde_json::Value>;

/// Block header fields returned by `getblock`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub weight: u64,
    pub time: u64,
    #[serde(default, rename = "mediantime")]
    pub median_time: u64,
    pub difficulty: f64,
}

#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    user: String,
    pass: String,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: &str, user: &str, pass: &str, timeout: Duration) -> Self {
        let normalized_url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url: normalized_url,
            user: user.to_string(),
            pass: pass.to_string(),
            client,
        }
    }

    /// Perform one call and decode its `result` member.
    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": REQUEST_ID,
            "method": method,
            "params": params
        });

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;

        // bitcoind reports rpc errors with a 500 and an error object in the body
        let json: JsonRpcResponse<T> = match serde_json::from_slice(&bytes) {
            Ok(json) => json,
            Err(_) if !status.is_success() => return Err(CollectorError::Status(status)),
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = json.error {
            return Err(CollectorError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        if !status.is_success() {
            return Err(CollectorError::Status(status));
        }

        json.result
            .ok_or_else(|| CollectorError::EmptyResult(method.to_string()))
    }
}

#[async_trait]
impl LedgerRpc for RpcClient {
    async fn get_last_block(&self) -> Result<(u64, String)> {
        let info: ChainInfo = self.call("getblockchaininfo", serde_json::json!([])).await?;
        Ok((info.blocks, info.best_block_hash))
    }

    async fn get_block_hash(&self, height: u64) -> Result<String> {
        self.call("getblockhash", serde_json::json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock> {
        self.call("getblock", serde_json::json!([hash])).await
    }

    async fn get_block_stats(&self, height: u64) -> Result<RawBlockStats> {
        self.call("getblockstats", serde_json::json!([height])).await
    }
}

// ==================== Internal Types ====================

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ChainInfo {
    blocks: u64,
    #[serde(rename = "bestblockhash")]
    best_block_hash: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response on a local port. The handle yields the
    /// raw request that was received.
    pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });

        (format!("http://{}", addr), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(url: &str) -> RpcClient {
        RpcClient::new(url, "u", "p", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_call_returns_result_with_basic_auth() {
        let (url, server) = serve_once("200 OK", r#"{"result":"abc","error":null,"id":"chain-collector"}"#).await;

        let hash = client(&url).get_block_hash(42).await.unwrap();
        assert_eq!(hash, "abc");

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST / HTTP/1.1"));
        // base64("u:p")
        assert!(lower.contains("authorization: basic dtpw"));
        assert!(request.contains(r#""method":"getblockhash""#));
        assert!(request.contains(r#""params":[42]"#));
    }

    #[tokio::test]
    async fn test_call_maps_error_object() {
        let (url, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":"chain-collector"}"#,
        )
        .await;

        match client(&url).get_block_hash(9_999_999).await {
            Err(CollectorError::Rpc { code, message }) => {
                assert_eq!(code, -8);
                assert_eq!(message, "Block height out of range");
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_maps_bad_status() {
        let (url, _server) = serve_once("503 Service Unavailable", "").await;

        match client(&url).get_block_hash(1).await {
            Err(CollectorError::Status(status)) => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_transport_error() {
        let result = client("http://127.0.0.1:1").get_block_hash(1).await;
        assert!(matches!(result, Err(CollectorError::Transport(_))));
    }

    #[test]
    fn test_block_deserialization() {
        let raw = r#"{
            "result": {
                "hash": "00000000000000000024fb37364cbf81fd49cc2d51c09c75c35433c3a1945d04",
                "confirmations": 1,
                "height": 500000,
                "size": 1048581,
                "weight": 3993515,
                "time": 1513622125,
                "mediantime": 1513620655,
                "difficulty": 1873105475221.611
            },
            "error": null,
            "id": "chain-collector"
        }"#;

        let resp: JsonRpcResponse<RpcBlock> = serde_json::from_str(raw).unwrap();
        let block = resp.result.unwrap();
        assert_eq!(block.height, 500000);
        assert_eq!(block.median_time, 1513620655);
        assert_eq!(block.weight, 3993515);
        assert!((block.difficulty - 1873105475221.611).abs() < 1e-3);
    }

    #[test]
    fn test_rpc_error_deserialization() {
        let raw = r#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":"x"}"#;
        let resp: JsonRpcResponse<String> = serde_json::from_str(raw).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -8);
    }

    #[test]
    fn test_url_normalization() {
        let client = RpcClient::new("127.0.0.1:8332", "u", "p", Duration::from_secs(1));
        assert_eq!(client.url, "http://127.0.0.1:8332");
    }
}
