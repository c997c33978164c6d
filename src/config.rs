// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::info;

use crate::guard::{AdmissionGuard, RateWindow};
use crate::ledger::rpc::{JsonRpcLedgerClient, LedgerRpc};
use crate::ledger::transaction::CustodialSigner;
use crate::metrics::SettlementMetrics;
use crate::orchestrator::SettlementOrchestrator;
use crate::retry_with_max_elapsed_time;
use crate::store::InMemoryProgressStore;
use crate::submitter::{RetryingSubmitter, SubmitPolicy};
use crate::tx_builder::SettlementTxBuilder;
use crate::types::{AccountAddress, CommitmentLevel};

/// A fully wired engine against the JSON-RPC ledger client.
pub type SettlementEngine = SettlementOrchestrator<JsonRpcLedgerClient, InMemoryProgressStore>;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerConfig {
    // Rpc url of the ledger fullnode, used for queries and submissions.
    pub ledger_rpc_url: String,
    // The settlement program's on-ledger address.
    pub program_address: String,
    // The chain id the node is expected to report.
    pub expected_chain_id: u8,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SubmitConfig {
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub max_elapsed_secs: u64,
    pub initial_backoff_ms: u64,
    pub commitment: CommitmentLevel,
    pub confirm_poll_interval_ms: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        let policy = SubmitPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
            max_elapsed_secs: policy.max_elapsed.as_secs(),
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            commitment: policy.commitment,
            confirm_poll_interval_ms: policy.confirm_poll_interval.as_millis() as u64,
        }
    }
}

impl SubmitConfig {
    pub fn policy(&self) -> SubmitPolicy {
        SubmitPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: std::time::Duration::from_secs(self.attempt_timeout_secs),
            max_elapsed: std::time::Duration::from_secs(self.max_elapsed_secs),
            initial_backoff: std::time::Duration::from_millis(self.initial_backoff_ms),
            commitment: self.commitment,
            confirm_poll_interval: std::time::Duration::from_millis(self.confirm_poll_interval_ms),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    // The port for the metrics server.
    pub metrics_port: u16,
    // Path of the file where the custodial signing key (Ed25519, base64
    // seed) is stored.
    pub custodial_key_path: PathBuf,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default)]
    pub rate_limit: RateWindow,
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {path:?}"))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {path:?}"))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config to {path:?}"))
    }

    /// A starting-point config for operators to edit.
    pub fn template() -> Self {
        Self {
            metrics_port: 9185,
            custodial_key_path: PathBuf::from("custodial.key"),
            ledger: LedgerConfig {
                ledger_rpc_url: "http://localhost:9850".to_string(),
                program_address: AccountAddress::ZERO.to_hex_literal(),
                expected_chain_id: 1,
            },
            submit: SubmitConfig::default(),
            rate_limit: RateWindow::default(),
        }
    }

    /// Validate the config against the live ledger and wire up the engine.
    pub async fn validate(
        &self,
        metrics: Arc<SettlementMetrics>,
    ) -> anyhow::Result<SettlementEngine> {
        info!("Starting config validation");

        let program = AccountAddress::from_hex_literal(&self.ledger.program_address)
            .map_err(|e| anyhow!("invalid program address: {e}"))?;

        let signer = CustodialSigner::from_base64_file(&self.custodial_key_path).map_err(|e| {
            anyhow!(
                "{e}. Please ensure the key file exists and contains a base64-encoded \
                 Ed25519 seed. You can generate one with: questline-settlement generate-key \
                 --output <path>"
            )
        })?;
        info!(
            "Loaded custodial key, on-ledger address {}",
            signer.address()
        );

        let ledger = Arc::new(JsonRpcLedgerClient::with_metrics(
            self.ledger.ledger_rpc_url.clone(),
            program,
            metrics.clone(),
        ));
        // Node may still be starting up; keep probing briefly.
        let chain_id = match retry_with_max_elapsed_time!(ledger.chain_id(), Duration::from_secs(15))
        {
            Ok(Ok(id)) => id,
            Ok(Err(e)) | Err(e) => {
                return Err(anyhow!(
                    "cannot reach ledger at {}: {e}",
                    self.ledger.ledger_rpc_url
                ))
            }
        };
        if chain_id != self.ledger.expected_chain_id {
            return Err(anyhow!(
                "Chain id mismatch: expected {}, but connected to {}",
                self.ledger.expected_chain_id,
                chain_id
            ));
        }
        info!("Connected to ledger chain {}", chain_id);

        let store = Arc::new(InMemoryProgressStore::new());
        let builder =
            SettlementTxBuilder::new(ledger.clone(), program, signer.address(), metrics.clone());
        let submitter = RetryingSubmitter::new(
            ledger,
            Arc::new(signer),
            self.submit.policy(),
            metrics.clone(),
        );
        let engine = SettlementOrchestrator::new(
            store,
            builder,
            submitter,
            AdmissionGuard::new(self.rate_limit),
            metrics,
        );

        info!("Config validation complete");
        Ok(engine)
    }
}

/// Generate a fresh custodial key file. Refuses to overwrite.
pub fn generate_key_file(path: &Path) -> anyhow::Result<AccountAddress> {
    if path.exists() {
        return Err(anyhow!("key file {path:?} already exists"));
    }
    let signer = CustodialSigner::generate();
    signer.write_base64_file(path)?;
    Ok(signer.address())
}
