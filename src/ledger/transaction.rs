// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction model for the settlement ledger.
//!
//! A transaction is a payer, a freshness anchor, and an ordered list of
//! instructions; the BCS-encoded message is signed by every required
//! signer and the whole envelope is hex-encoded for submission. The
//! builder produces `UnsignedTransaction`s without an anchor — the
//! submitter injects a fresh anchor per attempt, because the ledger
//! rejects messages referencing an expired one.

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{SettlementError, SettlementResult};
use crate::types::{AccountAddress, CourseId, TrackId};

/// The ledger's freshness token: a short-lived 32-byte sequence anchor a
/// transaction must reference to be accepted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Anchor(pub [u8; 32]);

impl Anchor {
    pub fn from_hex(s: &str) -> SettlementResult<Self> {
        let bytes = hex::decode(s.trim().trim_start_matches("0x"))
            .map_err(|e| SettlementError::Serialization(format!("invalid anchor hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SettlementError::Serialization("anchor must be 32 bytes".to_string()))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anchor({})", self.to_hex())
    }
}

impl Serialize for Anchor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Anchor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Anchor::from_hex(&s).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("anchor must be 32 bytes"))?;
            Ok(Anchor(arr))
        }
    }
}

/// One account an instruction touches, with its access flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub address: AccountAddress,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(address: AccountAddress) -> Self {
        Self {
            address,
            is_signer: false,
            is_writable: true,
        }
    }

    pub fn readonly(address: AccountAddress) -> Self {
        Self {
            address,
            is_signer: false,
            is_writable: false,
        }
    }

    pub fn signer(address: AccountAddress) -> Self {
        Self {
            address,
            is_signer: true,
            is_writable: true,
        }
    }
}

/// Instruction payloads understood by the settlement program.
/// This enum is the program's wire contract; variant order is part of the
/// BCS encoding and must stay stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionData {
    CreateEnrollment {
        course: CourseId,
        learner: AccountAddress,
    },
    CreateXpAccount {
        owner: AccountAddress,
    },
    FinalizeCourse {
        course: CourseId,
        lessons_total: u32,
        completion_bonus_xp: u64,
    },
    MintXp {
        amount: u64,
        reason: Option<String>,
    },
    CompleteDailyChallenge {
        /// Days from the common era, matching `achievement_index`.
        day: i32,
        achievement_index: u64,
    },
    IssueCredential {
        track: TrackId,
        level: u32,
        courses_completed: u32,
        total_xp: u64,
        metadata_uri: String,
    },
    UpgradeCredential {
        level: u32,
        courses_completed: u32,
        total_xp: u64,
        metadata_uri: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program: AccountAddress,
    pub accounts: Vec<AccountMeta>,
    pub data: InstructionData,
}

/// A fully formed transaction minus the anchor and signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub payer: AccountAddress,
    pub instructions: Vec<Instruction>,
}

#[derive(Serialize)]
struct TransactionMessage<'a> {
    payer: &'a AccountAddress,
    anchor: &'a Anchor,
    instructions: &'a [Instruction],
}

impl UnsignedTransaction {
    /// BCS-encode the signable message for a given anchor.
    pub fn message_bytes(&self, anchor: &Anchor) -> SettlementResult<Vec<u8>> {
        bcs::to_bytes(&TransactionMessage {
            payer: &self.payer,
            anchor,
            instructions: &self.instructions,
        })
        .map_err(|e| SettlementError::Serialization(e.to_string()))
    }
}

/// A signed transaction ready for submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub message: Vec<u8>,
    pub signatures: Vec<Vec<u8>>,
}

impl SignedTransaction {
    /// Hex envelope accepted by `txpool.submit_hex_transaction`.
    pub fn to_hex(&self) -> SettlementResult<String> {
        let bytes =
            bcs::to_bytes(self).map_err(|e| SettlementError::Serialization(e.to_string()))?;
        Ok(hex::encode(bytes))
    }
}

/// The platform's custodial signing key. Shared across concurrent
/// submissions; signing never mutates key material.
pub struct CustodialSigner {
    key: SigningKey,
    address: AccountAddress,
}

impl CustodialSigner {
    pub fn new(key: SigningKey) -> Self {
        // The on-ledger address of a key is the SHA-256 of its public key.
        let digest = Sha256::digest(key.verifying_key().as_bytes());
        let address = AccountAddress::new(digest.into());
        Self { key, address }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Read a base64-encoded 32-byte seed from a key file.
    pub fn from_base64_file(path: &Path) -> SettlementResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SettlementError::Configuration(format!(
                "failed to read custodial key from {path:?}: {e}"
            ))
        })?;
        let bytes = BASE64.decode(contents.trim()).map_err(|e| {
            SettlementError::Configuration(format!("custodial key at {path:?} is not base64: {e}"))
        })?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            SettlementError::Configuration(format!(
                "custodial key at {path:?} must decode to 32 bytes"
            ))
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Write the key seed to a file as base64.
    pub fn write_base64_file(&self, path: &Path) -> SettlementResult<()> {
        std::fs::write(path, BASE64.encode(self.key.to_bytes())).map_err(|e| {
            SettlementError::Configuration(format!("failed to write key to {path:?}: {e}"))
        })
    }

    pub fn address(&self) -> AccountAddress {
        self.address
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }

    /// Sign a transaction for submission with the given anchor.
    pub fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        anchor: &Anchor,
    ) -> SettlementResult<SignedTransaction> {
        let message = tx.message_bytes(anchor)?;
        let signature = self.sign(&message);
        Ok(SignedTransaction {
            message,
            signatures: vec![signature],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier as _};

    fn signer() -> CustodialSigner {
        CustodialSigner::from_seed([11u8; 32])
    }

    fn sample_tx(payer: AccountAddress) -> UnsignedTransaction {
        UnsignedTransaction {
            payer,
            instructions: vec![Instruction {
                program: AccountAddress::new([1u8; 32]),
                accounts: vec![
                    AccountMeta::signer(payer),
                    AccountMeta::writable(AccountAddress::new([2u8; 32])),
                ],
                data: InstructionData::MintXp {
                    amount: 100,
                    reason: Some("quiz".to_string()),
                },
            }],
        }
    }

    #[test]
    fn test_message_depends_on_anchor() {
        let signer = signer();
        let tx = sample_tx(signer.address());
        let m1 = tx.message_bytes(&Anchor([1u8; 32])).unwrap();
        let m2 = tx.message_bytes(&Anchor([2u8; 32])).unwrap();
        assert_ne!(m1, m2);
        // same anchor, same bytes
        assert_eq!(m1, tx.message_bytes(&Anchor([1u8; 32])).unwrap());
    }

    #[test]
    fn test_signature_verifies() {
        let signer = signer();
        let tx = sample_tx(signer.address());
        let anchor = Anchor([9u8; 32]);
        let signed = signer.sign_transaction(&tx, &anchor).unwrap();
        assert_eq!(signed.signatures.len(), 1);

        let verifying = SigningKey::from_bytes(&[11u8; 32]).verifying_key();
        let sig_bytes: [u8; 64] = signed.signatures[0].clone().try_into().unwrap();
        let sig = Signature::from_bytes(&sig_bytes);
        verifying.verify(&signed.message, &sig).unwrap();
    }

    #[test]
    fn test_signed_envelope_hex_round_trip() {
        let signer = signer();
        let tx = sample_tx(signer.address());
        let signed = signer.sign_transaction(&tx, &Anchor([3u8; 32])).unwrap();
        let hex_env = signed.to_hex().unwrap();
        let decoded: SignedTransaction =
            bcs::from_bytes(&hex::decode(hex_env).unwrap()).unwrap();
        assert_eq!(decoded.message, signed.message);
        assert_eq!(decoded.signatures, signed.signatures);
    }

    #[test]
    fn test_key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodial.key");
        let original = signer();
        original.write_base64_file(&path).unwrap();
        let loaded = CustodialSigner::from_base64_file(&path).unwrap();
        assert_eq!(loaded.address(), original.address());
    }

    #[test]
    fn test_key_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        std::fs::write(&path, "not base64 at all!!!").unwrap();
        assert!(matches!(
            CustodialSigner::from_base64_file(&path),
            Err(SettlementError::Configuration(_))
        ));
    }

    #[test]
    fn test_anchor_hex_round_trip() {
        let anchor = Anchor([0xcd; 32]);
        assert_eq!(Anchor::from_hex(&anchor.to_hex()).unwrap(), anchor);
        assert!(Anchor::from_hex("0x1234").is_err());
    }
}
