// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builds unsigned settlement transactions from current ledger state.
//!
//! Every build re-reads the accounts the instruction will touch: a missing
//! enrollment or XP account gets a create instruction prepended in the same
//! transaction, and state that already reflects the settlement surfaces as
//! `AlreadySettled` here, before anything is signed or submitted. That
//! pre-flight check is what heals a previous `Timeout` whose transaction
//! landed after the caller gave up.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{SettlementError, SettlementResult};
use crate::ledger::accounts::{
    decode_account, CredentialAccount, EnrollmentAccount, MinterAccount,
};
use crate::ledger::address;
use crate::ledger::rpc::LedgerRpc;
use crate::ledger::transaction::{AccountMeta, Instruction, InstructionData, UnsignedTransaction};
use crate::metrics::SettlementMetrics;
use crate::ttl_cache::TtlCache;
use crate::types::{AccountAddress, AccountLookup, CourseConfig, TrackId};

const MINTER_CACHE_TTL: Duration = Duration::from_secs(10);

/// An unsigned transaction plus the signers whose signatures the envelope
/// must carry. The submitter refuses to sign if the custodial key does not
/// cover all of them.
#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    pub transaction: UnsignedTransaction,
    pub required_signers: Vec<AccountAddress>,
}

/// A built credential transaction with its derivation facts.
#[derive(Clone, Debug)]
pub struct CredentialTransaction {
    pub built: BuiltTransaction,
    pub credential_address: AccountAddress,
    pub newly_issued: bool,
}

pub struct SettlementTxBuilder<L> {
    ledger: Arc<L>,
    program: AccountAddress,
    /// Custodial signer address: pays for and signs every settlement, and
    /// must be the registered minter authority.
    payer: AccountAddress,
    minter_cache: TtlCache<MinterAccount>,
    metrics: Arc<SettlementMetrics>,
}

impl<L: LedgerRpc> SettlementTxBuilder<L> {
    pub fn new(
        ledger: Arc<L>,
        program: AccountAddress,
        payer: AccountAddress,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            ledger,
            program,
            payer,
            minter_cache: TtlCache::new(MINTER_CACHE_TTL),
            metrics,
        }
    }

    pub fn program(&self) -> &AccountAddress {
        &self.program
    }

    /// Read (or reuse) the minter account. Cached briefly: the active flag
    /// and daily limit move slowly, and a stale read only shifts where a
    /// limit violation is caught (the program enforces it regardless).
    async fn minter(&self) -> SettlementResult<MinterAccount> {
        if let Some(minter) = self.minter_cache.get_if_valid().await {
            self.metrics
                .account_cache_hit
                .with_label_values(&["minter"])
                .inc();
            return Ok(minter);
        }
        self.metrics
            .account_cache_miss
            .with_label_values(&["minter"])
            .inc();

        let minter_addr = address::minter_address(&self.program, &self.payer);
        let minter: MinterAccount = match self.ledger.get_account(&minter_addr).await? {
            AccountLookup::Found(state) => decode_account(&state.data)?,
            AccountLookup::Missing => {
                return Err(SettlementError::PreconditionFailed(format!(
                    "minter account {minter_addr} does not exist"
                )))
            }
        };
        self.minter_cache.update(minter.clone()).await;
        Ok(minter)
    }

    /// Check the minter can cover a mint of `amount` right now.
    async fn check_minter(&self, amount: u64) -> SettlementResult<()> {
        let minter = self.minter().await?;
        if minter.authority != self.payer {
            return Err(SettlementError::Unauthorized(format!(
                "custodial key {} is not the minter authority {}",
                self.payer, minter.authority
            )));
        }
        if !minter.active {
            return Err(SettlementError::MinterInactive);
        }
        if amount > minter.remaining_today() {
            // Could be a stale cache entry; drop it so the next build
            // re-reads before failing again.
            self.minter_cache.invalidate().await;
            return Err(SettlementError::MinterLimitExceeded);
        }
        Ok(())
    }

    fn finish(&self, instructions: Vec<Instruction>) -> BuiltTransaction {
        BuiltTransaction {
            transaction: UnsignedTransaction {
                payer: self.payer,
                instructions,
            },
            required_signers: vec![self.payer],
        }
    }

    /// Build the course-finalization transaction: mark the enrollment
    /// finalized and mint the completion bonus, creating the enrollment
    /// account first if the ledger has never seen this pair.
    pub async fn build_finalize_course(
        &self,
        learner: &AccountAddress,
        course: &CourseConfig,
    ) -> SettlementResult<BuiltTransaction> {
        let enrollment_addr = address::enrollment_address(&self.program, &course.id, learner);
        let xp_addr = address::xp_account_address(&self.program, learner);
        let minter_addr = address::minter_address(&self.program, &self.payer);

        let mut instructions = Vec::new();
        match self.ledger.get_account(&enrollment_addr).await? {
            AccountLookup::Found(state) => {
                let enrollment: EnrollmentAccount = decode_account(&state.data)?;
                if enrollment.finalized {
                    tracing::info!(
                        learner = %learner,
                        course = %course.id,
                        "enrollment already finalized on ledger"
                    );
                    return Err(SettlementError::AlreadySettled { signature: None });
                }
            }
            AccountLookup::Missing => {
                instructions.push(Instruction {
                    program: self.program,
                    accounts: vec![
                        AccountMeta::signer(self.payer),
                        AccountMeta::writable(enrollment_addr),
                    ],
                    data: InstructionData::CreateEnrollment {
                        course: course.id.clone(),
                        learner: *learner,
                    },
                });
            }
        }

        self.check_minter(course.completion_bonus_xp).await?;
        if self.ledger.get_account(&xp_addr).await?.is_missing() {
            instructions.push(self.create_xp_account_ix(learner, xp_addr));
        }

        instructions.push(Instruction {
            program: self.program,
            accounts: vec![
                AccountMeta::signer(self.payer),
                AccountMeta::writable(enrollment_addr),
                AccountMeta::writable(minter_addr),
                AccountMeta::writable(xp_addr),
                AccountMeta::readonly(address::config_address(&self.program)),
            ],
            data: InstructionData::FinalizeCourse {
                course: course.id.clone(),
                lessons_total: course.total_lessons,
                completion_bonus_xp: course.completion_bonus_xp,
            },
        });
        Ok(self.finish(instructions))
    }

    /// Build an ad-hoc XP mint, creating the learner's XP account if needed.
    pub async fn build_reward_xp(
        &self,
        learner: &AccountAddress,
        amount: u64,
        reason: Option<String>,
    ) -> SettlementResult<BuiltTransaction> {
        self.check_minter(amount).await?;

        let xp_addr = address::xp_account_address(&self.program, learner);
        let minter_addr = address::minter_address(&self.program, &self.payer);

        let mut instructions = Vec::new();
        if self.ledger.get_account(&xp_addr).await?.is_missing() {
            instructions.push(self.create_xp_account_ix(learner, xp_addr));
        }
        instructions.push(Instruction {
            program: self.program,
            accounts: vec![
                AccountMeta::signer(self.payer),
                AccountMeta::writable(minter_addr),
                AccountMeta::writable(xp_addr),
            ],
            data: InstructionData::MintXp { amount, reason },
        });
        Ok(self.finish(instructions))
    }

    /// Build the daily-challenge achievement claim. The achievement slot's
    /// existence is the settlement marker, so a pre-existing slot means a
    /// prior attempt already landed.
    pub async fn build_daily_challenge(
        &self,
        learner: &AccountAddress,
        day: chrono::NaiveDate,
        streak: u32,
    ) -> SettlementResult<BuiltTransaction> {
        use chrono::Datelike;

        let index = address::achievement_index(day, streak);
        let achievement_addr = address::achievement_address(&self.program, learner, index);
        if !self.ledger.get_account(&achievement_addr).await?.is_missing() {
            return Err(SettlementError::AlreadySettled { signature: None });
        }

        let instructions = vec![Instruction {
            program: self.program,
            accounts: vec![
                AccountMeta::signer(self.payer),
                AccountMeta::writable(achievement_addr),
            ],
            data: InstructionData::CompleteDailyChallenge {
                day: day.num_days_from_ce(),
                achievement_index: index,
            },
        }];
        Ok(self.finish(instructions))
    }

    /// Build a credential issue or in-place upgrade for (learner, track).
    /// A live credential whose facts already cover the request is reported
    /// as settled rather than rewritten.
    pub async fn build_credential(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
        level: u32,
        courses_completed: u32,
        total_xp: u64,
        metadata_uri: String,
    ) -> SettlementResult<CredentialTransaction> {
        let credential_addr = address::credential_address(&self.program, learner, track);

        let (data, newly_issued) = match self.ledger.get_account(&credential_addr).await? {
            AccountLookup::Missing => (
                InstructionData::IssueCredential {
                    track: track.clone(),
                    level,
                    courses_completed,
                    total_xp,
                    metadata_uri,
                },
                true,
            ),
            AccountLookup::Found(state) => {
                let existing: CredentialAccount = decode_account(&state.data)?;
                if existing.level >= level && existing.courses_completed >= courses_completed {
                    return Err(SettlementError::AlreadySettled { signature: None });
                }
                (
                    InstructionData::UpgradeCredential {
                        level,
                        courses_completed,
                        total_xp,
                        metadata_uri,
                    },
                    false,
                )
            }
        };

        let instructions = vec![Instruction {
            program: self.program,
            accounts: vec![
                AccountMeta::signer(self.payer),
                AccountMeta::writable(credential_addr),
            ],
            data,
        }];
        Ok(CredentialTransaction {
            built: self.finish(instructions),
            credential_address: credential_addr,
            newly_issued,
        })
    }

    fn create_xp_account_ix(
        &self,
        learner: &AccountAddress,
        xp_addr: AccountAddress,
    ) -> Instruction {
        Instruction {
            program: self.program,
            accounts: vec![
                AccountMeta::signer(self.payer),
                AccountMeta::writable(xp_addr),
            ],
            data: InstructionData::CreateXpAccount { owner: *learner },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::accounts::encode_account;
    use crate::ledger::mock::MockLedger;
    use crate::types::CourseId;

    fn program() -> AccountAddress {
        AccountAddress::new([0xaa; 32])
    }

    fn payer() -> AccountAddress {
        AccountAddress::new([0xbb; 32])
    }

    fn learner() -> AccountAddress {
        AccountAddress::new([0x01; 32])
    }

    fn course() -> CourseConfig {
        CourseConfig {
            id: CourseId::from("rust-101"),
            track: TrackId::from("rust"),
            total_lessons: 10,
            xp_per_lesson: 50,
            completion_bonus_xp: 500,
        }
    }

    fn seed_minter(ledger: &MockLedger, active: bool, daily_limit: u64, minted_today: u64) {
        let minter = MinterAccount {
            authority: payer(),
            active,
            daily_limit,
            minted_today,
        };
        ledger.set_account(
            address::minter_address(&program(), &payer()),
            program(),
            encode_account(&minter).unwrap(),
        );
    }

    fn builder(ledger: Arc<MockLedger>) -> SettlementTxBuilder<MockLedger> {
        SettlementTxBuilder::new(
            ledger,
            program(),
            payer(),
            Arc::new(SettlementMetrics::new_for_testing()),
        )
    }

    #[tokio::test]
    async fn test_finalize_prepends_creates_for_fresh_learner() {
        let ledger = Arc::new(MockLedger::new());
        seed_minter(&ledger, true, 10_000, 0);

        let built = builder(ledger)
            .build_finalize_course(&learner(), &course())
            .await
            .unwrap();

        assert_eq!(built.required_signers, vec![payer()]);
        let ixs = &built.transaction.instructions;
        assert_eq!(ixs.len(), 3);
        assert!(matches!(ixs[0].data, InstructionData::CreateEnrollment { .. }));
        assert!(matches!(ixs[1].data, InstructionData::CreateXpAccount { .. }));
        assert!(matches!(
            ixs[2].data,
            InstructionData::FinalizeCourse {
                lessons_total: 10,
                completion_bonus_xp: 500,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_finalize_skips_create_when_enrollment_exists() {
        let ledger = Arc::new(MockLedger::new());
        seed_minter(&ledger, true, 10_000, 0);
        let enrollment = EnrollmentAccount {
            learner: learner(),
            lessons_total: 10,
            finalized: false,
        };
        ledger.set_account(
            address::enrollment_address(&program(), &course().id, &learner()),
            program(),
            encode_account(&enrollment).unwrap(),
        );
        ledger.set_account(
            address::xp_account_address(&program(), &learner()),
            program(),
            vec![],
        );

        let built = builder(ledger)
            .build_finalize_course(&learner(), &course())
            .await
            .unwrap();
        assert_eq!(built.transaction.instructions.len(), 1);
        assert!(matches!(
            built.transaction.instructions[0].data,
            InstructionData::FinalizeCourse { .. }
        ));
    }

    #[tokio::test]
    async fn test_finalize_detects_prior_settlement() {
        let ledger = Arc::new(MockLedger::new());
        seed_minter(&ledger, true, 10_000, 0);
        let enrollment = EnrollmentAccount {
            learner: learner(),
            lessons_total: 10,
            finalized: true,
        };
        ledger.set_account(
            address::enrollment_address(&program(), &course().id, &learner()),
            program(),
            encode_account(&enrollment).unwrap(),
        );

        let err = builder(ledger)
            .build_finalize_course(&learner(), &course())
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::AlreadySettled { signature: None });
    }

    #[tokio::test]
    async fn test_reward_xp_minter_gates() {
        let ledger = Arc::new(MockLedger::new());

        // no minter at all
        let b = builder(ledger.clone());
        assert!(matches!(
            b.build_reward_xp(&learner(), 100, None).await,
            Err(SettlementError::PreconditionFailed(_))
        ));

        // inactive minter
        seed_minter(&ledger, false, 10_000, 0);
        let b = builder(ledger.clone());
        assert_eq!(
            b.build_reward_xp(&learner(), 100, None).await.unwrap_err(),
            SettlementError::MinterInactive
        );

        // over the daily limit
        seed_minter(&ledger, true, 1_000, 950);
        let b = builder(ledger.clone());
        assert_eq!(
            b.build_reward_xp(&learner(), 100, None).await.unwrap_err(),
            SettlementError::MinterLimitExceeded
        );

        // wrong authority
        let minter = MinterAccount {
            authority: AccountAddress::new([0xcc; 32]),
            active: true,
            daily_limit: 10_000,
            minted_today: 0,
        };
        ledger.set_account(
            address::minter_address(&program(), &payer()),
            program(),
            encode_account(&minter).unwrap(),
        );
        let b = builder(ledger);
        assert!(matches!(
            b.build_reward_xp(&learner(), 100, None).await,
            Err(SettlementError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_reward_xp_reuses_existing_xp_account() {
        let ledger = Arc::new(MockLedger::new());
        seed_minter(&ledger, true, 10_000, 0);
        ledger.set_account(
            address::xp_account_address(&program(), &learner()),
            program(),
            vec![],
        );

        let built = builder(ledger)
            .build_reward_xp(&learner(), 250, Some("quiz bonus".to_string()))
            .await
            .unwrap();
        assert_eq!(built.transaction.instructions.len(), 1);
        assert!(matches!(
            built.transaction.instructions[0].data,
            InstructionData::MintXp { amount: 250, .. }
        ));
    }

    #[tokio::test]
    async fn test_daily_challenge_slot_existence_short_circuits() {
        let ledger = Arc::new(MockLedger::new());
        let day: chrono::NaiveDate = "2026-02-04".parse().unwrap();
        let index = address::achievement_index(day, 3);
        ledger.set_account(
            address::achievement_address(&program(), &learner(), index),
            program(),
            vec![],
        );

        let err = builder(ledger)
            .build_daily_challenge(&learner(), day, 3)
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::AlreadySettled { signature: None });
    }

    #[tokio::test]
    async fn test_credential_issue_then_upgrade() {
        let ledger = Arc::new(MockLedger::new());
        let track = TrackId::from("rust");

        let b = builder(ledger.clone());
        let issued = b
            .build_credential(&learner(), &track, 1, 1, 600, "ipfs://a".to_string())
            .await
            .unwrap();
        assert!(issued.newly_issued);
        assert!(matches!(
            issued.built.transaction.instructions[0].data,
            InstructionData::IssueCredential { level: 1, .. }
        ));

        // seed the credential as if the issue landed, then upgrade
        let existing = CredentialAccount {
            learner: learner(),
            track: track.clone(),
            level: 1,
            courses_completed: 1,
            total_xp: 600,
            metadata_uri: "ipfs://a".to_string(),
        };
        ledger.set_account(
            issued.credential_address,
            program(),
            encode_account(&existing).unwrap(),
        );

        let upgraded = b
            .build_credential(&learner(), &track, 2, 3, 2_400, "ipfs://b".to_string())
            .await
            .unwrap();
        assert!(!upgraded.newly_issued);
        assert_eq!(upgraded.credential_address, issued.credential_address);
        assert!(matches!(
            upgraded.built.transaction.instructions[0].data,
            InstructionData::UpgradeCredential { level: 2, .. }
        ));

        // a request the live credential already covers is settled
        let err = b
            .build_credential(&learner(), &track, 1, 1, 600, "ipfs://a".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::AlreadySettled { signature: None });
    }
}
