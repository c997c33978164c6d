// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Signs and submits built transactions, retrying transient failures.
//!
//! Each attempt fetches a fresh anchor, signs, submits, and polls for the
//! configured commitment. Anchor-expiry and node-busy rejections are
//! transient and retried with exponential backoff; semantic rejections
//! return immediately. When the wall-clock budget elapses without a
//! confirmation the result is `Timeout`, which deliberately does NOT mean
//! the transaction failed: a later attempt by the caller re-reads ledger
//! state before submitting again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SettlementError, SettlementResult};
use crate::ledger::rpc::{LedgerRpc, TxStatus};
use crate::ledger::transaction::CustodialSigner;
use crate::metrics::SettlementMetrics;
use crate::tx_builder::BuiltTransaction;
use crate::types::{CommitmentLevel, TxSignature};

const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SubmitPolicy {
    /// Maximum number of sign-and-submit attempts.
    pub max_attempts: u32,
    /// How long to poll one submission for confirmation before moving on.
    pub attempt_timeout: Duration,
    /// Total wall-clock budget across all attempts.
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
    pub commitment: CommitmentLevel,
    pub confirm_poll_interval: Duration,
}

impl Default for SubmitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(45),
            initial_backoff: Duration::from_millis(200),
            commitment: CommitmentLevel::Confirmed,
            confirm_poll_interval: Duration::from_millis(250),
        }
    }
}

pub struct RetryingSubmitter<L> {
    ledger: Arc<L>,
    signer: Arc<CustodialSigner>,
    policy: SubmitPolicy,
    metrics: Arc<SettlementMetrics>,
}

enum AttemptOutcome {
    Confirmed(TxSignature),
    Transient(SettlementError),
    Terminal(SettlementError),
    /// Attempt window closed with the transaction neither executed nor
    /// rejected. It may still land.
    Undecided,
}

impl<L: LedgerRpc> RetryingSubmitter<L> {
    pub fn new(
        ledger: Arc<L>,
        signer: Arc<CustodialSigner>,
        policy: SubmitPolicy,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            ledger,
            signer,
            policy,
            metrics,
        }
    }

    pub fn signer_address(&self) -> crate::types::AccountAddress {
        self.signer.address()
    }

    /// Submit a built transaction and wait for the configured commitment.
    pub async fn submit(&self, built: &BuiltTransaction) -> SettlementResult<TxSignature> {
        for required in &built.required_signers {
            if *required != self.signer.address() {
                return Err(SettlementError::Configuration(format!(
                    "transaction requires signer {required} but the custodial key is {}",
                    self.signer.address()
                )));
            }
        }

        let started = Instant::now();
        let mut backoff = self.policy.initial_backoff;
        let mut attempts = 0u32;
        let mut last_transient: Option<SettlementError> = None;

        while attempts < self.policy.max_attempts {
            if started.elapsed() >= self.policy.max_elapsed {
                break;
            }
            attempts += 1;

            match self.attempt(built, started).await {
                AttemptOutcome::Confirmed(signature) => {
                    self.metrics.tx_confirmed.inc();
                    self.metrics
                        .tx_submit_attempts
                        .with_label_values(&["confirmed"])
                        .observe(attempts as f64);
                    tracing::info!(
                        signature = %signature,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "transaction confirmed"
                    );
                    return Ok(signature);
                }
                AttemptOutcome::Terminal(err) => {
                    if !matches!(err, SettlementError::AlreadySettled { .. }) {
                        self.metrics.tx_failed.inc();
                    }
                    self.metrics
                        .tx_submit_attempts
                        .with_label_values(&["terminal"])
                        .observe(attempts as f64);
                    return Err(err);
                }
                AttemptOutcome::Transient(err) => {
                    tracing::warn!(
                        attempt = attempts,
                        error = %err,
                        "transient submission failure, backing off"
                    );
                    last_transient = Some(err);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                AttemptOutcome::Undecided => {
                    // No backoff: the next attempt starts with a status
                    // re-check via the anchor-fresh rebuild upstream, and
                    // a duplicate landing surfaces as AlreadySettled.
                    tracing::warn!(attempt = attempts, "attempt window closed unconfirmed");
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= self.policy.max_elapsed || last_transient.is_none() {
            self.metrics
                .tx_submit_attempts
                .with_label_values(&["timeout"])
                .observe(attempts as f64);
            return Err(SettlementError::Timeout { elapsed });
        }
        Err(last_transient.unwrap_or(SettlementError::Timeout { elapsed }))
    }

    async fn attempt(&self, built: &BuiltTransaction, started: Instant) -> AttemptOutcome {
        // Never reuse an anchor across attempts.
        let anchor = match self.ledger.latest_anchor().await {
            Ok(anchor) => anchor,
            Err(err) => return self.classify(err),
        };
        self.metrics.anchor_refreshes.inc();

        let signed = match self.signer.sign_transaction(&built.transaction, &anchor) {
            Ok(signed) => signed,
            Err(err) => return AttemptOutcome::Terminal(err),
        };
        let tx_hex = match signed.to_hex() {
            Ok(hex) => hex,
            Err(err) => return AttemptOutcome::Terminal(err),
        };

        let signature = match self.ledger.submit_transaction(&tx_hex).await {
            Ok(signature) => signature,
            Err(err) => return self.classify(err),
        };
        self.metrics.tx_submitted.inc();

        let attempt_deadline = Instant::now() + self.policy.attempt_timeout;
        loop {
            match self.ledger.transaction_status(&signature).await {
                Ok(TxStatus::Executed { finalized }) => {
                    let satisfied = match self.policy.commitment {
                        CommitmentLevel::Confirmed => true,
                        CommitmentLevel::Finalized => finalized,
                    };
                    if satisfied {
                        return AttemptOutcome::Confirmed(signature);
                    }
                }
                Ok(TxStatus::Rejected { code, message }) => {
                    return self.classify(SettlementError::from_program_error(code, message));
                }
                Ok(TxStatus::Unknown) => {}
                Err(err) => {
                    if !err.is_transient() {
                        return AttemptOutcome::Terminal(err);
                    }
                    // transient poll failure, keep polling
                }
            }
            if Instant::now() >= attempt_deadline
                || started.elapsed() >= self.policy.max_elapsed
            {
                return AttemptOutcome::Undecided;
            }
            tokio::time::sleep(self.policy.confirm_poll_interval).await;
        }
    }

    fn classify(&self, err: SettlementError) -> AttemptOutcome {
        if err.is_transient() {
            AttemptOutcome::Transient(err)
        } else {
            AttemptOutcome::Terminal(err)
        }
    }
}
