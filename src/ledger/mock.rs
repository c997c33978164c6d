// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory `LedgerRpc` implementation for tests. Accounts are seeded
//! directly, submissions are recorded, and failures can be scripted per
//! call to exercise the retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{SettlementError, SettlementResult};
use crate::ledger::rpc::{AccountState, LedgerRpc, TxStatus};
use crate::ledger::transaction::{Anchor, Instruction, SignedTransaction};
use crate::types::{AccountAddress, AccountLookup, TxSignature};

/// Mirror of the signable message layout, for inspecting submissions.
#[derive(Debug, Deserialize)]
pub struct DecodedMessage {
    pub payer: AccountAddress,
    pub anchor: Anchor,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug)]
pub struct SubmittedTransaction {
    pub signature: TxSignature,
    pub transaction: SignedTransaction,
}

impl SubmittedTransaction {
    pub fn decode(&self) -> DecodedMessage {
        bcs::from_bytes(&self.transaction.message).expect("submitted message should decode")
    }
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<AccountAddress, AccountState>,
    submitted: Vec<SubmittedTransaction>,
    statuses: HashMap<String, TxStatus>,
    /// Errors returned by the next submit calls, in order, before
    /// submissions start succeeding again.
    submit_failures: Vec<SettlementError>,
    /// Rejection applied to the next executed submission's status.
    next_rejection: Option<(u32, String)>,
}

pub struct MockLedger {
    chain_id: u8,
    anchor_counter: AtomicU64,
    signature_counter: AtomicU64,
    state: Mutex<MockState>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            chain_id: 7,
            anchor_counter: AtomicU64::new(1),
            signature_counter: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_account(&self, address: AccountAddress, owner: AccountAddress, data: Vec<u8>) {
        self.state.lock().unwrap().accounts.insert(
            address,
            AccountState {
                owner,
                data,
                balance: 0,
            },
        );
    }

    pub fn remove_account(&self, address: &AccountAddress) {
        self.state.lock().unwrap().accounts.remove(address);
    }

    /// Queue errors for upcoming submit calls (consumed in order).
    pub fn fail_next_submits(&self, errors: Vec<SettlementError>) {
        self.state.lock().unwrap().submit_failures = errors;
    }

    /// Make the next accepted submission report a program rejection when
    /// its status is polled.
    pub fn reject_next_submission(&self, code: u32, message: impl Into<String>) {
        self.state.lock().unwrap().next_rejection = Some((code, message.into()));
    }

    pub fn submitted(&self) -> Vec<TxSignature> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|s| s.signature.clone())
            .collect()
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    pub fn last_submitted(&self) -> Option<DecodedMessage> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .last()
            .map(|s| s.decode())
    }

    pub fn anchor_fetches(&self) -> u64 {
        self.anchor_counter.load(Ordering::SeqCst).saturating_sub(1)
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn chain_id(&self) -> SettlementResult<u8> {
        Ok(self.chain_id)
    }

    async fn latest_anchor(&self) -> SettlementResult<Anchor> {
        let n = self.anchor_counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        Ok(Anchor(bytes))
    }

    async fn get_account(
        &self,
        address: &AccountAddress,
    ) -> SettlementResult<AccountLookup<AccountState>> {
        let state = self.state.lock().unwrap();
        Ok(match state.accounts.get(address) {
            Some(account) => AccountLookup::Found(account.clone()),
            None => AccountLookup::Missing,
        })
    }

    async fn submit_transaction(&self, tx_hex: &str) -> SettlementResult<TxSignature> {
        let mut state = self.state.lock().unwrap();
        if !state.submit_failures.is_empty() {
            return Err(state.submit_failures.remove(0));
        }

        let bytes = hex::decode(tx_hex)
            .map_err(|e| SettlementError::Serialization(format!("bad tx hex: {e}")))?;
        let transaction: SignedTransaction = bcs::from_bytes(&bytes)
            .map_err(|e| SettlementError::Serialization(format!("bad tx envelope: {e}")))?;

        let n = self.signature_counter.fetch_add(1, Ordering::SeqCst);
        let signature = TxSignature(format!("mock-sig-{n}"));

        let status = match state.next_rejection.take() {
            Some((code, message)) => TxStatus::Rejected { code, message },
            None => TxStatus::Executed { finalized: true },
        };
        state.statuses.insert(signature.0.clone(), status);
        state.submitted.push(SubmittedTransaction {
            signature: signature.clone(),
            transaction,
        });
        Ok(signature)
    }

    async fn transaction_status(&self, signature: &TxSignature) -> SettlementResult<TxStatus> {
        let state = self.state.lock().unwrap();
        Ok(state
            .statuses
            .get(signature.as_str())
            .cloned()
            .unwrap_or(TxStatus::Unknown))
    }
}
