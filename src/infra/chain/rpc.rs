//! JSON-RPC client for the payout contract's RPC service.
//!
//! The payout contract is an opaque service: the relayer reads
//! `tip_allowance` / `tip_balanceOf`, submits batches with
//! `tip_submitBatch`, and polls `tip_getReceipt` for per-item outcomes.
//! Submission is authorized by the backend-held executor key, sent as a
//! bearer token; the service signs and sequences the actual transaction.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::{AppError, BatchReceipt, ChainClient, ChainError, TipIntent};

/// Chain RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub rpc_url: String,
    pub request_timeout: Duration,
}

impl RpcClientConfig {
    #[must_use]
    pub fn new(rpc_url: &str) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC chain client for the payout service
pub struct RpcChainClient {
    config: RpcClientConfig,
    http_client: reqwest::Client,
    executor_key: SecretString,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'static str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubmitBatchResult {
    tx_ref: String,
}

impl RpcChainClient {
    pub fn new(config: RpcClientConfig, executor_key: SecretString) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Chain(ChainError::Connection(e.to_string())))?;

        Ok(Self {
            config,
            http_client,
            executor_key,
        })
    }

    pub fn with_defaults(rpc_url: &str, executor_key: SecretString) -> Result<Self, AppError> {
        Self::new(RpcClientConfig::new(rpc_url), executor_key)
    }

    /// Issue one JSON-RPC call. A `null` result maps to `Ok(None)`.
    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
        authorized: bool,
    ) -> Result<Option<R>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "tipcast",
            method,
            params,
        };

        let mut builder = self.http_client.post(&self.config.rpc_url).json(&request);
        if authorized {
            builder = builder.bearer_auth(self.executor_key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Chain(ChainError::Connection(e.to_string())))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| AppError::Chain(ChainError::Rpc(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            debug!(method = method, code = error.code, message = %error.message, "RPC error");
            return Err(AppError::Chain(ChainError::Rpc(format!(
                "{} failed: {} (code {})",
                method, error.message, error.code
            ))));
        }

        Ok(rpc_response.result)
    }

    fn require<R>(result: Option<R>, method: &'static str) -> Result<R, AppError> {
        result.ok_or_else(|| {
            AppError::Chain(ChainError::Rpc(format!("{} returned empty result", method)))
        })
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _: serde_json::Value =
            Self::require(self.call("tip_ping", Vec::<String>::new(), false).await?, "tip_ping")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn allowance(&self, owner: &str, spender: &str, token: &str) -> Result<u64, AppError> {
        let result = self
            .call("tip_allowance", [owner, spender, token], false)
            .await?;
        Self::require(result, "tip_allowance")
    }

    #[instrument(skip(self))]
    async fn balance_of(&self, owner: &str, token: &str) -> Result<u64, AppError> {
        let result = self.call("tip_balanceOf", [owner, token], false).await?;
        Self::require(result, "tip_balanceOf")
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn submit_batch(&self, items: &[TipIntent]) -> Result<String, AppError> {
        let result: Option<SubmitBatchResult> = self
            .call("tip_submitBatch", [items], true)
            .await
            .map_err(|e| match e {
                AppError::Chain(ChainError::Rpc(msg)) => {
                    AppError::Chain(ChainError::SubmissionFailed(msg))
                }
                other => other,
            })?;
        Ok(Self::require(result, "tip_submitBatch")?.tx_ref)
    }

    #[instrument(skip(self))]
    async fn get_receipt(&self, tx_ref: &str) -> Result<Option<BatchReceipt>, AppError> {
        self.call("tip_getReceipt", [tx_ref], false).await
    }
}
