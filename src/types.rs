// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Base types shared across the settlement engine: ledger addresses and
//! signatures, settlement kinds, and the off-chain domain records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{SettlementError, SettlementResult};

/// A 32-byte ledger account address, hex-encoded with a `0x` prefix in
/// RPC traffic and config files.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountAddress([u8; 32]);

impl AccountAddress {
    pub const LENGTH: usize = 32;
    pub const ZERO: AccountAddress = AccountAddress([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex_literal(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex_literal(s: &str) -> SettlementResult<Self> {
        let stripped = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(stripped)
            .map_err(|e| SettlementError::Validation(format!("invalid address hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            SettlementError::Validation(format!("address must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_literal())
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_literal())
    }
}

// Hex string in JSON/YAML, raw bytes in BCS.
impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex_literal())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            AccountAddress::from_hex_literal(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("address must be 32 bytes"))?;
            Ok(AccountAddress(arr))
        }
    }
}

/// The hash of a submitted transaction, as returned by the ledger node.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSignature(pub String);

impl TxSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CourseId(pub String);

impl CourseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseId({})", self.0)
    }
}

impl From<&str> for CourseId {
    fn from(s: &str) -> Self {
        CourseId(s.to_string())
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrackId({})", self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        TrackId(s.to_string())
    }
}

/// The kinds of reward settlement the orchestrator performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementKind {
    FinalizeCourse,
    RewardXp,
    DailyChallenge,
    Credential,
}

impl SettlementKind {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::FinalizeCourse => "finalize_course",
            SettlementKind::RewardXp => "reward_xp",
            SettlementKind::DailyChallenge => "daily_challenge",
            SettlementKind::Credential => "credential",
        }
    }
}

/// Logical identity of one settlement: (actor, resource, operation kind).
/// Two requests with the same key describe the same settlement and must
/// produce at most one on-ledger effect.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub learner: AccountAddress,
    pub resource: String,
    pub kind: SettlementKind,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind.as_str(), self.learner, self.resource)
    }
}

/// How far to wait for a submitted transaction before declaring success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitmentLevel {
    /// The node has executed the transaction.
    Confirmed,
    /// The transaction's block can no longer be rolled back.
    Finalized,
}

/// Result of a ledger account lookup. Lookups return `Missing` rather than
/// an error so absence can steer instruction shape without exception-driven
/// control flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountLookup<T> {
    Found(T),
    Missing,
}

impl<T> AccountLookup<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, AccountLookup::Missing)
    }

    pub fn found(self) -> Option<T> {
        match self {
            AccountLookup::Found(v) => Some(v),
            AccountLookup::Missing => None,
        }
    }
}

/// Per-course configuration supplied by the (external) content system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseConfig {
    pub id: CourseId,
    pub track: TrackId,
    pub total_lessons: u32,
    pub xp_per_lesson: u64,
    /// XP bonus minted on course finalization.
    pub completion_bonus_xp: u64,
}

/// One (learner, course) enrollment with its lesson-completion bitmap.
///
/// `completed_at` is set exactly when every lesson bit below
/// `CourseConfig::total_lessons` is set, and never unset afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub learner: AccountAddress,
    pub course: CourseId,
    /// Bit `i % 64` of word `i / 64` set ⇔ lesson `i` complete.
    pub lesson_flags: Vec<u64>,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ledger address of the credential asset, once one is linked.
    pub credential_asset: Option<AccountAddress>,
}

impl Enrollment {
    pub fn new(learner: AccountAddress, course: CourseId, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            learner,
            course,
            lesson_flags: Vec::new(),
            enrolled_at,
            completed_at: None,
            credential_asset: None,
        }
    }
}

/// One off-chain XP ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpEntry {
    pub date: NaiveDate,
    pub amount: u64,
    pub reason: Option<String>,
    /// Set once the corresponding mint is confirmed on the ledger.
    pub signature: Option<TxSignature>,
}

/// Receipt for a confirmed course finalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeCourseReceipt {
    pub tx_signature: TxSignature,
}

/// Receipt for a confirmed ad-hoc XP mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardXpReceipt {
    pub tx_signature: TxSignature,
    pub amount: u64,
}

/// Receipt for a daily challenge. The ledger leg is best-effort:
/// `tx_signature` is `None` when the off-chain record stood in for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyChallengeReceipt {
    pub tx_signature: Option<TxSignature>,
    pub already_completed: bool,
}

/// Receipt for a credential issuance or upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialReceipt {
    pub credential_address: AccountAddress,
    pub tx_signature: TxSignature,
    /// False when an existing credential asset was upgraded in place.
    pub newly_issued: bool,
}

/// Off-chain progress snapshot returned after a lesson completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub course: CourseId,
    pub lesson_index: u32,
    /// False when the lesson bit was already set (idempotent replay).
    pub newly_completed: bool,
    pub completed_lessons: u32,
    pub total_lessons: u32,
    pub course_completed: bool,
    pub xp_earned: u64,
}
