//! HTTP transport shared by the JSON-RPC backed adapters
//!
//! Holds one or more endpoints and fails over to the next one on transport
//! errors. Node-level JSON-RPC errors are handed back to the caller, which
//! decides whether they mean "not found" or a real failure.

use crate::chain::ChainId;
use crate::error::{TrackerError, TrackerResult};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// Error object returned by a node
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Message or detail data contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.message.contains(needle)
            || self
                .data
                .as_ref()
                .is_some_and(|d| d.to_string().contains(needle))
    }
}

/// Multi-endpoint HTTP client with failover
pub(crate) struct RpcClient {
    chain_id: ChainId,
    http: Client,
    urls: Vec<String>,
    current: AtomicUsize,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(chain_id: ChainId, urls: Vec<String>) -> TrackerResult<Self> {
        if urls.is_empty() {
            return Err(TrackerError::ChainConnection {
                chain_id,
                message: "No RPC endpoints configured".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TrackerError::connection(&chain_id, e))?;

        Ok(Self {
            chain_id,
            http,
            urls: urls
                .into_iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            current: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    fn failover(&self) {
        if self.urls.len() < 2 {
            return;
        }
        let next = (self.current.load(Ordering::Relaxed) + 1) % self.urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to endpoint {}", self.chain_id, next);
    }

    /// JSON-RPC call; the inner `Err` is an error object returned by the node.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> TrackerResult<Result<Option<T>, JsonRpcError>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut last_error = None;
        for _ in 0..self.urls.len() {
            let sent = self.http.post(self.url()).json(&request).send().await;
            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    warn!("Chain {} {} failed: {}", self.chain_id, method, e);
                    last_error = Some(e);
                    self.failover();
                    continue;
                }
            };

            let body: JsonRpcResponse<T> = response.json().await.map_err(|e| {
                TrackerError::rpc(&self.chain_id, format!("{}: invalid response: {}", method, e))
            })?;

            return Ok(match body.error {
                Some(error) => Err(error),
                None => Ok(body.result),
            });
        }

        Err(TrackerError::connection(
            &self.chain_id,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all endpoints failed".to_string()),
        ))
    }

    /// JSON-RPC call that treats node errors and empty results as failures
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> TrackerResult<T> {
        match self.request(method, params).await? {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(TrackerError::rpc(
                &self.chain_id,
                format!("{}: empty result", method),
            )),
            Err(e) => Err(TrackerError::rpc(
                &self.chain_id,
                format!("{}: {} ({})", method, e.message, e.code),
            )),
        }
    }

    /// Plain REST GET relative to the endpoint; 404 maps to `None`
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> TrackerResult<Option<T>> {
        let mut last_error = None;
        for _ in 0..self.urls.len() {
            let url = format!("{}{}", self.url(), path);
            let response = match self.http.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Chain {} GET {} failed: {}", self.chain_id, path, e);
                    last_error = Some(e);
                    self.failover();
                    continue;
                }
            };

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(TrackerError::rpc(
                    &self.chain_id,
                    format!("GET {}: HTTP {}", path, response.status()),
                ));
            }

            return response.json().await.map(Some).map_err(|e| {
                TrackerError::rpc(&self.chain_id, format!("GET {}: invalid response: {}", path, e))
            });
        }

        Err(TrackerError::connection(
            &self.chain_id,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all endpoints failed".to_string()),
        ))
    }
}
