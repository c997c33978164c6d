// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod streak;
pub mod submitter;
pub mod ttl_cache;
pub mod tx_builder;
pub mod types;

#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 30, 60, 120, 120 ...
        let backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(400),
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: Duration::from_secs(120),
            max_elapsed_time: Some($max_elapsed_time),
            ..Default::default()
        };
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => {
                        return Ok(result);
                    }
                    Err(e) => {
                        // Every error is treated as transient on this read path;
                        // the write path in submitter.rs does its own classification.
                        tracing::debug!("Retrying due to error: {:?}", e);
                        return Err(backoff::Error::transient(e));
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    // Ledger node still warming up: the first two reads fail, the third
    // returns the chain id.
    async fn flaky_chain_info(calls: &AtomicU32) -> anyhow::Result<u8> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(anyhow::anyhow!("connection refused"))
        } else {
            Ok(7)
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let id = retry_with_max_elapsed_time!(flaky_chain_info(&calls), Duration::from_secs(30))
            .unwrap()
            .unwrap();
        assert_eq!(id, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_within_budget() {
        async fn always_down() -> anyhow::Result<u8> {
            Err(anyhow::anyhow!("connection refused"))
        }
        let budget = Duration::from_millis(300);
        let started = std::time::Instant::now();
        retry_with_max_elapsed_time!(always_down(), budget).unwrap_err();
        // backoff stops scheduling attempts once the budget is spent
        assert!(started.elapsed() < budget + Duration::from_secs(2));
    }
}
