//! JSON-RPC 2.0 transport to the Ethereum node.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U64, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::error::{ChainError, RpcFailure};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<u64>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Split the response into its result or a classified failure.
    /// A missing `result` is returned as JSON `null` (e.g. pending receipts).
    pub fn into_result(self) -> Result<Value, RpcFailure> {
        match self.error {
            Some(err) => Err(RpcFailure::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Something that can carry a JSON-RPC call to a node.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure>;
}

/// JSON-RPC over HTTP(S).
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::new(method, params, id);
        trace!(id, method, "rpc request");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RpcFailure::Transport(format!("HTTP {status}: {text}")));
        }

        let response: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("invalid JSON-RPC response: {e}")))?;
        response.into_result()
    }
}

// ---------------------------------------------------------------------------
// Ethereum wire types
// ---------------------------------------------------------------------------

/// Parameters of `eth_call` / `eth_sendTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// The subset of a transaction receipt this layer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    /// `1` on success, `0` when execution reverted. Absent before Byzantium.
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.is_none_or(|s| s == U64::from(1))
    }
}

// ---------------------------------------------------------------------------
// EthClient
// ---------------------------------------------------------------------------

/// Typed `eth_*` calls over any [`RpcTransport`].
#[derive(Clone)]
pub struct EthClient {
    transport: Arc<dyn RpcTransport>,
}

impl EthClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcFailure> {
        let value = self.transport.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcFailure::Transport(format!("unexpected {method} result: {e}")))
    }

    /// Read-only call against the latest block.
    pub async fn call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.call_at(tx, "latest").await
    }

    /// Read-only call against a specific block tag or hex number.
    pub async fn call_at(&self, tx: &TransactionRequest, block: &str) -> Result<Bytes, ChainError> {
        Ok(self.request("eth_call", json!([tx, block])).await?)
    }

    pub async fn send_transaction(&self, tx: &TransactionRequest) -> Result<B256, RpcFailure> {
        let hash: B256 = self.request("eth_sendTransaction", json!([tx])).await?;
        debug!(%hash, "transaction broadcast");
        Ok(hash)
    }

    /// `None` while the transaction is not yet mined.
    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.request("eth_getTransactionReceipt", json!([hash])).await?)
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, RpcFailure> {
        self.request("eth_accounts", json!([])).await
    }

    pub async fn request_accounts(&self) -> Result<Vec<Address>, RpcFailure> {
        self.request("eth_requestAccounts", json!([])).await
    }

    pub async fn chain_id(&self) -> Result<u64, RpcFailure> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }
}
