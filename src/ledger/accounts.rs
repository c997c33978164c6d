// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! BCS layouts of the on-ledger accounts the engine reads before building
//! instructions. These mirror the settlement program's state and are part
//! of its fixed external contract.

use serde::{Deserialize, Serialize};

use crate::error::{SettlementError, SettlementResult};
use crate::types::{AccountAddress, TrackId};

/// The XP minter account. A mint is accepted only from its authority,
/// while it is active, and within its daily limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterAccount {
    pub authority: AccountAddress,
    pub active: bool,
    pub daily_limit: u64,
    pub minted_today: u64,
}

impl MinterAccount {
    pub fn remaining_today(&self) -> u64 {
        self.daily_limit.saturating_sub(self.minted_today)
    }
}

/// The on-ledger enrollment record for (course, learner).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentAccount {
    pub learner: AccountAddress,
    pub lessons_total: u32,
    pub finalized: bool,
}

/// A credential asset. Non-transferable; upgraded in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAccount {
    pub learner: AccountAddress,
    pub track: TrackId,
    pub level: u32,
    pub courses_completed: u32,
    pub total_xp: u64,
    pub metadata_uri: String,
}

/// An achievement slot. Its existence is the settlement marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementAccount {
    pub learner: AccountAddress,
    pub achievement_index: u64,
}

/// Decode a typed account from raw ledger account data.
pub fn decode_account<T: for<'de> Deserialize<'de>>(data: &[u8]) -> SettlementResult<T> {
    bcs::from_bytes(data)
        .map_err(|e| SettlementError::Serialization(format!("account data decode failed: {e}")))
}

/// Encode a typed account to raw account data (used by tests and the mock
/// ledger to seed state).
pub fn encode_account<T: Serialize>(value: &T) -> SettlementResult<Vec<u8>> {
    bcs::to_bytes(value)
        .map_err(|e| SettlementError::Serialization(format!("account data encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minter_round_trip_and_remaining() {
        let minter = MinterAccount {
            authority: AccountAddress::new([5u8; 32]),
            active: true,
            daily_limit: 10_000,
            minted_today: 9_400,
        };
        assert_eq!(minter.remaining_today(), 600);

        let bytes = encode_account(&minter).unwrap();
        let back: MinterAccount = decode_account(&bytes).unwrap();
        assert_eq!(back, minter);
    }

    #[test]
    fn test_remaining_saturates() {
        let minter = MinterAccount {
            authority: AccountAddress::ZERO,
            active: true,
            daily_limit: 100,
            minted_today: 250,
        };
        assert_eq!(minter.remaining_today(), 0);
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        let credential = CredentialAccount {
            learner: AccountAddress::new([1u8; 32]),
            track: TrackId::from("rust"),
            level: 3,
            courses_completed: 4,
            total_xp: 5_000,
            metadata_uri: "ipfs://cid".to_string(),
        };
        let mut bytes = encode_account(&credential).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            decode_account::<CredentialAccount>(&bytes),
            Err(SettlementError::Serialization(_))
        ));
    }
}
