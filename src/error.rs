// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::types::TxSignature;

/// Errors produced by the settlement engine.
///
/// Variants map 1:1 onto the caller-facing error codes of the request
/// surface; `error_type` returns the stable label used in metrics and
/// alerting, and `is_retryable` tells callers whether trying again can
/// ever change the outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    // Malformed input. Caller error, never retried.
    #[error("invalid request: {0}")]
    Validation(String),
    // The actor exceeded its sliding-window quota for this operation kind.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    // A settlement for the same idempotency key is currently in flight.
    #[error("a settlement for this key is already in flight")]
    InFlight,
    // The ledger (or the outcome table) reports this settlement as done.
    // Terminal success of a previous attempt, not a failure.
    #[error("already settled")]
    AlreadySettled { signature: Option<TxSignature> },
    // Course finalization requested while lesson bits are still unset.
    #[error("course not completed: {missing} lessons remaining")]
    NotCompleted { missing: u32 },
    // Course id is unknown to the catalog.
    #[error("course not found: {0}")]
    CourseNotFound(String),
    // A prerequisite account or business rule is not met.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    // The custodial key is not the registered minter authority.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    // The XP minter account is deactivated on the ledger.
    #[error("minter is inactive")]
    MinterInactive,
    // The mint would exceed the minter's daily limit.
    #[error("minter daily limit exceeded")]
    MinterLimitExceeded,
    // Network/timeout/node-busy failure. Retried by the submitter.
    #[error("transient ledger error: {0}")]
    TransientLedger(String),
    // The ledger program refused the instruction. Terminal.
    #[error("ledger rejected transaction (code {code}): {message}")]
    SemanticRejection { code: u32, message: String },
    // The total submission budget elapsed with no confirmation. The
    // transaction may still land; callers must re-query before retrying.
    #[error("submission timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("serialization error: {0}")]
    Serialization(String),
    // Missing custodial key, endpoint, or signer mismatch. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Ledger program error codes. These are a fixed external contract.
pub mod program_error {
    pub const ALREADY_SETTLED: u32 = 1001;
    pub const PREREQUISITE_MISSING: u32 = 1002;
    pub const MINTER_INACTIVE: u32 = 1003;
    pub const MINTER_LIMIT_EXCEEDED: u32 = 1004;
    pub const UNAUTHORIZED_MINTER: u32 = 1005;
    pub const ANCHOR_EXPIRED: u32 = 1006;
    pub const NODE_BUSY: u32 = 1007;
}

impl SettlementError {
    /// Map a ledger-reported program error code to a domain error.
    pub fn from_program_error(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            program_error::ALREADY_SETTLED => SettlementError::AlreadySettled { signature: None },
            program_error::PREREQUISITE_MISSING => SettlementError::PreconditionFailed(message),
            program_error::MINTER_INACTIVE => SettlementError::MinterInactive,
            program_error::MINTER_LIMIT_EXCEEDED => SettlementError::MinterLimitExceeded,
            program_error::UNAUTHORIZED_MINTER => SettlementError::Unauthorized(message),
            program_error::ANCHOR_EXPIRED | program_error::NODE_BUSY => {
                SettlementError::TransientLedger(message)
            }
            _ => SettlementError::SemanticRejection { code, message },
        }
    }

    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "validation",
            SettlementError::RateLimited { .. } => "rate_limited",
            SettlementError::InFlight => "in_flight",
            SettlementError::AlreadySettled { .. } => "already_settled",
            SettlementError::NotCompleted { .. } => "not_completed",
            SettlementError::CourseNotFound(_) => "course_not_found",
            SettlementError::PreconditionFailed(_) => "precondition_failed",
            SettlementError::Unauthorized(_) => "unauthorized",
            SettlementError::MinterInactive => "minter_inactive",
            SettlementError::MinterLimitExceeded => "minter_limit_exceeded",
            SettlementError::TransientLedger(_) => "transient_ledger",
            SettlementError::SemanticRejection { .. } => "semantic_rejection",
            SettlementError::Timeout { .. } => "timeout",
            SettlementError::Serialization(_) => "serialization",
            SettlementError::Configuration(_) => "configuration",
        }
    }

    /// Whether a caller can safely retry the operation as-is.
    ///
    /// `Timeout` is deliberately *not* retryable: the transaction may still
    /// land, so the caller must re-query authoritative state first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::RateLimited { .. }
                | SettlementError::InFlight
                | SettlementError::TransientLedger(_)
        )
    }

    /// True for transient failures the submitter may retry internally.
    pub fn is_transient(&self) -> bool {
        matches!(self, SettlementError::TransientLedger(_))
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_error_mapping() {
        assert_eq!(
            SettlementError::from_program_error(program_error::ALREADY_SETTLED, "done"),
            SettlementError::AlreadySettled { signature: None }
        );
        assert_eq!(
            SettlementError::from_program_error(program_error::MINTER_INACTIVE, ""),
            SettlementError::MinterInactive
        );
        assert_eq!(
            SettlementError::from_program_error(program_error::MINTER_LIMIT_EXCEEDED, ""),
            SettlementError::MinterLimitExceeded
        );
        // Anchor expiry and node-busy retry with a fresh anchor.
        assert!(
            SettlementError::from_program_error(program_error::ANCHOR_EXPIRED, "expired")
                .is_transient()
        );
        assert!(SettlementError::from_program_error(program_error::NODE_BUSY, "busy").is_transient());
        // Unknown codes stay semantic with the code preserved.
        match SettlementError::from_program_error(4242, "weird") {
            SettlementError::SemanticRejection { code, message } => {
                assert_eq!(code, 4242);
                assert_eq!(message, "weird");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_retryability() {
        assert!(SettlementError::TransientLedger("io".into()).is_retryable());
        assert!(SettlementError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(SettlementError::InFlight.is_retryable());

        assert!(!SettlementError::Validation("bad".into()).is_retryable());
        assert!(!SettlementError::NotCompleted { missing: 2 }.is_retryable());
        assert!(!SettlementError::AlreadySettled { signature: None }.is_retryable());
        assert!(!SettlementError::SemanticRejection {
            code: 9,
            message: "no".into()
        }
        .is_retryable());
        // Timeout must force a state re-query, never a blind retry.
        assert!(!SettlementError::Timeout {
            elapsed: Duration::from_secs(30)
        }
        .is_retryable());
    }

    /// These error types are used in monitoring dashboards and alerts.
    /// Changing them would break alerting - they MUST remain stable.
    #[test]
    fn test_error_types_stability() {
        assert_eq!(
            SettlementError::AlreadySettled { signature: None }.error_type(),
            "already_settled"
        );
        assert_eq!(
            SettlementError::TransientLedger("any".into()).error_type(),
            "transient_ledger"
        );
        assert_eq!(
            SettlementError::SemanticRejection {
                code: 1,
                message: "any".into()
            }
            .error_type(),
            "semantic_rejection"
        );
        assert_eq!(SettlementError::MinterInactive.error_type(), "minter_inactive");
    }

    /// error_type values must be valid Prometheus label values
    /// (lowercase, underscores only, no spaces or special chars)
    #[test]
    fn test_error_types_valid_prometheus_labels() {
        let errors = vec![
            SettlementError::Validation("x".into()),
            SettlementError::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            SettlementError::InFlight,
            SettlementError::AlreadySettled { signature: None },
            SettlementError::NotCompleted { missing: 1 },
            SettlementError::CourseNotFound("c".into()),
            SettlementError::PreconditionFailed("p".into()),
            SettlementError::Unauthorized("u".into()),
            SettlementError::MinterInactive,
            SettlementError::MinterLimitExceeded,
            SettlementError::TransientLedger("t".into()),
            SettlementError::SemanticRejection {
                code: 1,
                message: "m".into(),
            },
            SettlementError::Timeout {
                elapsed: Duration::from_secs(1),
            },
            SettlementError::Serialization("s".into()),
            SettlementError::Configuration("c".into()),
        ];
        for error in errors {
            let label = error.error_type();
            assert!(!label.is_empty());
            for c in label.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "error_type '{}' contains invalid character '{}'",
                    label,
                    c
                );
            }
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }
}
