// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0, 9.5,
    10., 15., 20., 25., 30., 35., 40., 45., 50., 60.,
];

#[derive(Clone, Debug)]
pub struct SettlementMetrics {
    /// Settlement requests by kind and final outcome label.
    pub(crate) settlements_total: IntCounterVec,
    pub(crate) settlement_latency: HistogramVec,

    /// Admission guard rejections by reason (in_flight, rate_limited,
    /// already_settled).
    pub(crate) guard_rejections: IntCounterVec,
    pub(crate) settlements_inflight: IntGauge,

    pub(crate) tx_submitted: IntCounter,
    pub(crate) tx_confirmed: IntCounter,
    pub(crate) tx_failed: IntCounter,
    pub(crate) tx_submit_attempts: HistogramVec,
    pub(crate) anchor_refreshes: IntCounter,

    pub(crate) ledger_rpc_errors: IntCounterVec,
    pub(crate) ledger_rpc_latency: HistogramVec,

    pub(crate) account_cache_hit: IntCounterVec,
    pub(crate) account_cache_miss: IntCounterVec,

    pub(crate) lessons_recorded: IntCounter,
    pub(crate) courses_completed: IntCounter,
    pub(crate) streaks_continued: IntCounter,
    pub(crate) streaks_reset: IntCounter,
    pub(crate) streak_freezes_consumed: IntCounter,
    pub(crate) xp_minted_total: IntCounter,
}

impl SettlementMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            settlements_total: register_int_counter_vec_with_registry!(
                "settlement_requests_total",
                "Total number of settlement requests, by kind and outcome",
                &["kind", "outcome"],
                registry,
            )
            .unwrap(),
            settlement_latency: register_histogram_vec_with_registry!(
                "settlement_latency_seconds",
                "End-to-end settlement latency, by kind",
                &["kind"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            guard_rejections: register_int_counter_vec_with_registry!(
                "settlement_guard_rejections",
                "Total number of admission guard rejections, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            settlements_inflight: register_int_gauge_with_registry!(
                "settlement_requests_inflight",
                "Number of settlements currently holding an in-flight slot",
                registry,
            )
            .unwrap(),
            tx_submitted: register_int_counter_with_registry!(
                "settlement_tx_submitted",
                "Total number of transactions submitted to the ledger",
                registry,
            )
            .unwrap(),
            tx_confirmed: register_int_counter_with_registry!(
                "settlement_tx_confirmed",
                "Total number of transactions confirmed at the requested commitment",
                registry,
            )
            .unwrap(),
            tx_failed: register_int_counter_with_registry!(
                "settlement_tx_failed",
                "Total number of transactions terminally rejected by the ledger",
                registry,
            )
            .unwrap(),
            tx_submit_attempts: register_histogram_vec_with_registry!(
                "settlement_tx_submit_attempts",
                "Number of submission attempts per settlement, by final outcome",
                &["outcome"],
                vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0],
                registry,
            )
            .unwrap(),
            anchor_refreshes: register_int_counter_with_registry!(
                "settlement_anchor_refreshes",
                "Total number of freshness anchors fetched for submission attempts",
                registry,
            )
            .unwrap(),
            ledger_rpc_errors: register_int_counter_vec_with_registry!(
                "settlement_ledger_rpc_errors",
                "Total number of ledger RPC errors, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            ledger_rpc_latency: register_histogram_vec_with_registry!(
                "settlement_ledger_rpc_latency",
                "Ledger RPC latency, by method",
                &["method"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            account_cache_hit: register_int_counter_vec_with_registry!(
                "settlement_account_cache_hit",
                "Total number of account cache hits, by account kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            account_cache_miss: register_int_counter_vec_with_registry!(
                "settlement_account_cache_miss",
                "Total number of account cache misses, by account kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            lessons_recorded: register_int_counter_with_registry!(
                "settlement_lessons_recorded",
                "Total number of newly completed lessons recorded",
                registry,
            )
            .unwrap(),
            courses_completed: register_int_counter_with_registry!(
                "settlement_courses_completed",
                "Total number of courses whose last lesson was recorded",
                registry,
            )
            .unwrap(),
            streaks_continued: register_int_counter_with_registry!(
                "settlement_streaks_continued",
                "Total number of streak continuations (including freeze bridges)",
                registry,
            )
            .unwrap(),
            streaks_reset: register_int_counter_with_registry!(
                "settlement_streaks_reset",
                "Total number of streaks reset to one",
                registry,
            )
            .unwrap(),
            streak_freezes_consumed: register_int_counter_with_registry!(
                "settlement_streak_freezes_consumed",
                "Total number of streak freezes consumed to bridge gaps",
                registry,
            )
            .unwrap(),
            xp_minted_total: register_int_counter_with_registry!(
                "settlement_xp_minted_total",
                "Total XP amount confirmed minted on the ledger",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
