// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! JSON-RPC client for the settlement ledger.
//!
//! `LedgerRpc` is the seam the builder, submitter, and orchestrator talk
//! through; `JsonRpcLedgerClient` is the HTTP implementation. Transport
//! errors are retried inline (connection resets during bursty polling are
//! common); everything above transport level is classified by
//! `SettlementError` and left to the submitter's policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SettlementError, SettlementResult};
use crate::ledger::transaction::Anchor;
use crate::metrics::SettlementMetrics;
use crate::types::{AccountAddress, AccountLookup, TxSignature};

/// Raw state of a ledger account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountState {
    pub owner: AccountAddress,
    pub data: Vec<u8>,
    pub balance: u64,
}

/// Execution status of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet visible on the node. A submitted-but-unconfirmed transaction
    /// may still land later.
    Unknown,
    Executed { finalized: bool },
    Rejected { code: u32, message: String },
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn chain_id(&self) -> SettlementResult<u8>;

    /// Fetch the current freshness anchor. Callers must fetch a new one
    /// immediately before each submission attempt and never share one
    /// across concurrent submissions.
    async fn latest_anchor(&self) -> SettlementResult<Anchor>;

    async fn get_account(
        &self,
        address: &AccountAddress,
    ) -> SettlementResult<AccountLookup<AccountState>>;

    async fn submit_transaction(&self, tx_hex: &str) -> SettlementResult<TxSignature>;

    async fn transaction_status(&self, signature: &TxSignature) -> SettlementResult<TxStatus>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Clone, Debug)]
pub struct JsonRpcLedgerClient {
    http_client: reqwest::Client,
    rpc_url: String,
    request_id: Arc<AtomicU64>,
    program_address: AccountAddress,
    metrics: Option<Arc<SettlementMetrics>>,
}

impl JsonRpcLedgerClient {
    pub fn new(rpc_url: impl Into<String>, program_address: AccountAddress) -> Self {
        fn shared_http_client() -> reqwest::Client {
            static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
            CLIENT
                .get_or_init(|| {
                    // Keep pooling enabled (production-friendly), but tune it
                    // for bursty workloads with many concurrent pollers.
                    reqwest::Client::builder()
                        .pool_max_idle_per_host(64)
                        .tcp_keepalive(Some(Duration::from_secs(30)))
                        .connect_timeout(Duration::from_secs(2))
                        .timeout(Duration::from_secs(30))
                        .build()
                        .expect("Failed to build reqwest client")
                })
                .clone()
        }

        Self {
            http_client: shared_http_client(),
            rpc_url: rpc_url.into(),
            request_id: Arc::new(AtomicU64::new(1)),
            program_address,
            metrics: None,
        }
    }

    /// Like `new`, but per-method latency and error counts are recorded.
    pub fn with_metrics(
        rpc_url: impl Into<String>,
        program_address: AccountAddress,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(rpc_url, program_address)
        }
    }

    pub fn program_address(&self) -> &AccountAddress {
        &self.program_address
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> SettlementResult<Value> {
        self.call_with_log(method, params, false).await
    }

    /// Call RPC with optional verbose logging.
    /// verbose=true: INFO level with full JSON request/response
    /// verbose=false: silent mode for background polling
    async fn call_with_log(
        &self,
        method: &str,
        params: Vec<Value>,
        verbose: bool,
    ) -> SettlementResult<Value> {
        let started = Instant::now();
        let result = self.call_inner(method, params, verbose).await;
        if let Some(metrics) = &self.metrics {
            metrics
                .ledger_rpc_latency
                .with_label_values(&[method])
                .observe(started.elapsed().as_secs_f64());
            if result.is_err() {
                metrics.ledger_rpc_errors.with_label_values(&[method]).inc();
            }
        }
        result
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Vec<Value>,
        verbose: bool,
    ) -> SettlementResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        };

        if verbose {
            let request_json = serde_json::to_string_pretty(&request).unwrap_or_default();
            tracing::info!("[RPC] >>> {}\n{}", method, request_json);
        }

        fn is_transient_transport_error(err: &reqwest::Error) -> bool {
            if err.is_connect() || err.is_timeout() {
                return true;
            }
            let msg = err.to_string().to_lowercase();
            msg.contains("connection closed")
                || msg.contains("connection reset")
                || msg.contains("broken pipe")
                || msg.contains("unexpected eof")
                || msg.contains("incomplete")
        }

        let max_attempts: usize = 3;
        let mut last_transport_err: Option<String> = None;

        for attempt in 0..max_attempts {
            let response = match self
                .http_client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        last_transport_err = Some(err.to_string());
                        tracing::warn!(
                            "[RPC] transport error calling {} (attempt {}/{}), retrying",
                            method,
                            attempt + 1,
                            max_attempts
                        );
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(SettlementError::TransientLedger(err.to_string()));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                tracing::error!("[RPC] <<< HTTP error {} \n{}", status, error_text);
                return Err(SettlementError::TransientLedger(format!(
                    "HTTP error: {status} - {error_text}"
                )));
            }

            let response_text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if attempt + 1 < max_attempts && is_transient_transport_error(&err) {
                        last_transport_err = Some(err.to_string());
                        tracing::warn!(
                            "[RPC] failed reading response for {} (attempt {}/{}), retrying",
                            method,
                            attempt + 1,
                            max_attempts
                        );
                        tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                        continue;
                    }
                    return Err(SettlementError::TransientLedger(err.to_string()));
                }
            };

            if verbose {
                tracing::info!("[RPC] <<< {}\n{}", method, response_text);
            }

            let rpc_response: JsonRpcResponse = serde_json::from_str(&response_text)
                .map_err(|e| SettlementError::Serialization(e.to_string()))?;

            if let Some(error) = rpc_response.error {
                tracing::error!(
                    "[RPC] RPC error on {}: code={}, message={}",
                    method,
                    error.code,
                    error.message
                );
                return Err(classify_rpc_error(error.code, error.message));
            }

            // A null result is valid for queries that return Option.
            return Ok(rpc_response.result.unwrap_or(Value::Null));
        }

        Err(SettlementError::TransientLedger(
            last_transport_err.unwrap_or_else(|| "RPC call failed after retries".to_string()),
        ))
    }
}

/// Map a JSON-RPC error body to a settlement error. Program error codes
/// (1000-range) carry domain meaning; standard JSON-RPC codes indicate a
/// client/config bug; server-side codes are transient.
fn classify_rpc_error(code: i64, message: String) -> SettlementError {
    match code {
        c if (1000..2000).contains(&c) => SettlementError::from_program_error(c as u32, message),
        -32700..=-32600 => {
            SettlementError::Configuration(format!("RPC error {code}: {message}"))
        }
        _ => SettlementError::TransientLedger(format!("RPC error {code}: {message}")),
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcLedgerClient {
    async fn chain_id(&self) -> SettlementResult<u8> {
        let info = self.call("chain.info", vec![]).await?;
        info.get("chain_id")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_u64())
            .map(|id| id as u8)
            .ok_or_else(|| {
                SettlementError::Serialization("chain.info missing chain_id.id".to_string())
            })
    }

    async fn latest_anchor(&self) -> SettlementResult<Anchor> {
        let result = self.call("chain.latest_anchor", vec![]).await?;
        let anchor_hex = result
            .get("anchor")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SettlementError::Serialization("chain.latest_anchor missing anchor".to_string())
            })?;
        Anchor::from_hex(anchor_hex)
    }

    async fn get_account(
        &self,
        address: &AccountAddress,
    ) -> SettlementResult<AccountLookup<AccountState>> {
        let result = self
            .call("state.get_account", vec![json!(address.to_hex_literal())])
            .await?;
        if result.is_null() {
            return Ok(AccountLookup::Missing);
        }
        let owner_hex = result
            .get("owner")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SettlementError::Serialization("account missing owner".to_string()))?;
        let data_hex = result.get("data").and_then(|v| v.as_str()).unwrap_or("0x");
        let data = hex::decode(data_hex.trim_start_matches("0x"))
            .map_err(|e| SettlementError::Serialization(format!("bad account data hex: {e}")))?;
        let balance = result.get("balance").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(AccountLookup::Found(AccountState {
            owner: AccountAddress::from_hex_literal(owner_hex)?,
            data,
            balance,
        }))
    }

    async fn submit_transaction(&self, tx_hex: &str) -> SettlementResult<TxSignature> {
        // Verbose logging for submission (shows full JSON request/response)
        let result = self
            .call_with_log("txpool.submit_hex_transaction", vec![json!(tx_hex)], true)
            .await?;
        let signature = result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                SettlementError::Serialization("submit did not return a signature".to_string())
            })?;
        Ok(TxSignature(signature))
    }

    async fn transaction_status(&self, signature: &TxSignature) -> SettlementResult<TxStatus> {
        let result = self
            .call("chain.get_transaction_info", vec![json!(signature.as_str())])
            .await?;
        Ok(parse_transaction_status(&result))
    }
}

fn parse_transaction_status(result: &Value) -> TxStatus {
    if result.is_null() {
        return TxStatus::Unknown;
    }
    let status = result
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown");
    if status.eq_ignore_ascii_case("executed") {
        let finalized = result
            .get("finalized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        return TxStatus::Executed { finalized };
    }
    if status.eq_ignore_ascii_case("rejected") || status.contains("Discard") {
        let code = result.get("code").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let message = result
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        return TxStatus::Rejected { code, message };
    }
    TxStatus::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::program_error;

    #[test]
    fn test_classify_program_errors() {
        assert_eq!(
            classify_rpc_error(program_error::ALREADY_SETTLED as i64, "done".into()),
            SettlementError::AlreadySettled { signature: None }
        );
        assert!(classify_rpc_error(program_error::NODE_BUSY as i64, "busy".into()).is_transient());
    }

    #[test]
    fn test_classify_rpc_level_errors() {
        assert!(matches!(
            classify_rpc_error(-32601, "method not found".into()),
            SettlementError::Configuration(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32005, "node overloaded".into()),
            SettlementError::TransientLedger(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_call_records_error_and_latency() {
        // port 9 (discard) is never listening; the call fails at transport
        // level and must still show up in the per-method series.
        let metrics = Arc::new(SettlementMetrics::new_for_testing());
        let client = JsonRpcLedgerClient::with_metrics(
            "http://127.0.0.1:9",
            AccountAddress::new([0u8; 32]),
            metrics.clone(),
        );
        let err = client.chain_id().await.unwrap_err();
        assert!(err.is_transient());

        assert_eq!(
            metrics
                .ledger_rpc_errors
                .with_label_values(&["chain.info"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .ledger_rpc_latency
                .with_label_values(&["chain.info"])
                .get_sample_count(),
            1
        );
    }

    #[test]
    fn test_parse_transaction_status() {
        assert_eq!(parse_transaction_status(&Value::Null), TxStatus::Unknown);
        assert_eq!(
            parse_transaction_status(&json!({"status": "Executed", "finalized": true})),
            TxStatus::Executed { finalized: true }
        );
        assert_eq!(
            parse_transaction_status(&json!({"status": "Executed"})),
            TxStatus::Executed { finalized: false }
        );
        assert_eq!(
            parse_transaction_status(
                &json!({"status": "Rejected", "code": 1001, "message": "already settled"})
            ),
            TxStatus::Rejected {
                code: 1001,
                message: "already settled".to_string()
            }
        );
        assert_eq!(
            parse_transaction_status(&json!({"status": "Pending"})),
            TxStatus::Unknown
        );
    }
}
