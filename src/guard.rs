// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Admission control for settlements.
//!
//! Two guards composed under one lock:
//! - idempotency: at most one in-flight settlement per logical key, and a
//!   completed-outcome table so a duplicate request can be answered with
//!   the prior result instead of a second on-ledger effect;
//! - rate limiting: a per-(actor, kind) sliding-window quota, independent
//!   of which resource the actor touches.
//!
//! Admission takes the whole decision atomically so two concurrent
//! duplicates can never both be allowed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{AccountAddress, IdempotencyKey, SettlementKind, TxSignature};

/// Sliding-window quota applied per (actor, operation kind).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateWindow {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateWindow {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 60,
        }
    }
}

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Proceed; the caller owns the in-flight slot until it calls
    /// `complete` or `release` for this key.
    Allowed,
    /// The settlement already succeeded; here is the prior result.
    AlreadySettled { signature: Option<TxSignature> },
    /// Another request for the same key is still pending.
    InFlight,
    /// Actor quota exhausted for this operation kind.
    RateLimited { retry_after: Duration },
}

#[derive(Default)]
struct GuardState {
    inflight: HashSet<IdempotencyKey>,
    /// Settlement-outcome table: keys whose settlement confirmed, with the
    /// transaction signature when one exists.
    completed: HashMap<IdempotencyKey, Option<TxSignature>>,
    windows: HashMap<(AccountAddress, SettlementKind), VecDeque<Instant>>,
}

pub struct AdmissionGuard {
    state: Mutex<GuardState>,
    rate: RateWindow,
}

impl AdmissionGuard {
    pub fn new(rate: RateWindow) -> Self {
        Self {
            state: Mutex::new(GuardState::default()),
            rate,
        }
    }

    /// Admit or reject a settlement request for `key`.
    ///
    /// Order matters: a completed key answers `AlreadySettled` without
    /// consuming quota; only genuinely new work counts against the window.
    pub async fn admit(&self, key: &IdempotencyKey) -> Admission {
        let mut state = self.state.lock().await;

        if let Some(signature) = state.completed.get(key) {
            debug!(key = %key, "admission short-circuit: already settled");
            return Admission::AlreadySettled {
                signature: signature.clone(),
            };
        }

        if state.inflight.contains(key) {
            warn!(key = %key, "admission rejected: settlement in flight");
            return Admission::InFlight;
        }

        let now = Instant::now();
        let window = self.rate.window();
        let hits = state
            .windows
            .entry((key.learner, key.kind))
            .or_default();
        while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
            hits.pop_front();
        }
        if hits.len() >= self.rate.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            warn!(key = %key, ?retry_after, "admission rejected: rate limited");
            return Admission::RateLimited { retry_after };
        }
        hits.push_back(now);

        state.inflight.insert(key.clone());
        debug!(key = %key, "admission granted");
        Admission::Allowed
    }

    /// Record a confirmed settlement. The key leaves the in-flight set and
    /// all future admissions answer `AlreadySettled` with this signature.
    pub async fn complete(&self, key: &IdempotencyKey, signature: Option<TxSignature>) {
        let mut state = self.state.lock().await;
        state.inflight.remove(key);
        state.completed.insert(key.clone(), signature);
    }

    /// Release an in-flight slot after a failed attempt so the settlement
    /// can be retried later.
    pub async fn release(&self, key: &IdempotencyKey) {
        let mut state = self.state.lock().await;
        state.inflight.remove(key);
    }

    /// Prior confirmed outcome for a key, if any.
    pub async fn prior_outcome(&self, key: &IdempotencyKey) -> Option<Option<TxSignature>> {
        let state = self.state.lock().await;
        state.completed.get(key).cloned()
    }

    pub async fn inflight_count(&self) -> usize {
        self.state.lock().await.inflight.len()
    }
}
