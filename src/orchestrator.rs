// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The settlement orchestrator: validates a request against off-chain
//! state, passes the admission guard, builds and submits the ledger
//! transaction, and records the outcome.
//!
//! Ordering is deliberate. Validation failures (unknown course, incomplete
//! bitmap, zero amount) are decided before admission so they consume no
//! quota and generate no ledger traffic. Once admitted, a key holds its
//! in-flight slot until the attempt resolves: `complete` on confirmation
//! (or on discovering a prior settlement), `release` on failure so the
//! caller may retry.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::error::{SettlementError, SettlementResult};
use crate::guard::{Admission, AdmissionGuard};
use crate::ledger::address;
use crate::ledger::rpc::LedgerRpc;
use crate::metrics::SettlementMetrics;
use crate::progress;
use crate::store::ProgressStore;
use crate::streak::{StreakRecord, StreakTransition};
use crate::submitter::RetryingSubmitter;
use crate::tx_builder::SettlementTxBuilder;
use crate::types::{
    AccountAddress, CourseConfig, CourseId, CredentialReceipt, DailyChallengeReceipt,
    FinalizeCourseReceipt, IdempotencyKey, LessonProgress, RewardXpReceipt, SettlementKind,
    TrackId, TxSignature, XpEntry,
};

pub struct SettlementOrchestrator<L, S> {
    store: Arc<S>,
    builder: SettlementTxBuilder<L>,
    submitter: RetryingSubmitter<L>,
    guard: AdmissionGuard,
    metrics: Arc<SettlementMetrics>,
}

impl<L: LedgerRpc, S: ProgressStore> SettlementOrchestrator<L, S> {
    pub fn new(
        store: Arc<S>,
        builder: SettlementTxBuilder<L>,
        submitter: RetryingSubmitter<L>,
        guard: AdmissionGuard,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            store,
            builder,
            submitter,
            guard,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record a lesson completion. Purely off-chain: sets the lesson bit,
    /// credits lesson XP, and advances the learner's streak. Replays are
    /// no-ops that earn nothing.
    pub async fn record_lesson_completion(
        &self,
        learner: &AccountAddress,
        course: &CourseId,
        lesson_index: u32,
        now: DateTime<Utc>,
    ) -> SettlementResult<LessonProgress> {
        let snapshot = self
            .store
            .mark_lesson_complete(learner, course, lesson_index, now)
            .await?;

        if snapshot.newly_completed {
            self.metrics.lessons_recorded.inc();
            if snapshot.course_completed {
                self.metrics.courses_completed.inc();
            }
            self.store
                .append_xp_entry(
                    learner,
                    XpEntry {
                        date: now.date_naive(),
                        amount: snapshot.xp_earned,
                        reason: Some(format!("lesson:{course}:{lesson_index}")),
                        signature: None,
                    },
                )
                .await;
            let (_, transition) = self
                .store
                .streak_activity(learner, now.date_naive(), snapshot.xp_earned)
                .await;
            self.observe_streak(transition);
        }
        Ok(snapshot)
    }

    /// Finalize a completed course on the ledger and mint the completion
    /// bonus. At most one on-ledger effect per (learner, course); duplicate
    /// requests get `AlreadySettled` carrying the original signature when
    /// the outcome table still has it.
    pub async fn finalize_course(
        &self,
        learner: &AccountAddress,
        course: &CourseId,
    ) -> SettlementResult<FinalizeCourseReceipt> {
        let started = Instant::now();
        let config = self
            .store
            .course(course)
            .await
            .ok_or_else(|| SettlementError::CourseNotFound(course.to_string()))?;

        // Completion is checked before admission: an incomplete course must
        // not consume quota or touch the ledger.
        let enrollment = self.store.enrollment(learner, course).await;
        let completed = enrollment
            .as_ref()
            .map(|e| progress::count_completed(&e.lesson_flags, config.total_lessons))
            .unwrap_or(0);
        if completed < config.total_lessons {
            return Err(SettlementError::NotCompleted {
                missing: config.total_lessons - completed,
            });
        }

        let key = IdempotencyKey {
            learner: *learner,
            resource: course.to_string(),
            kind: SettlementKind::FinalizeCourse,
        };
        self.admit(&key).await?;

        let attempt = async {
            let built = self.builder.build_finalize_course(learner, &config).await?;
            self.submitter.submit(&built).await
        };
        match attempt.await {
            Ok(signature) => {
                self.settle(&key, Some(signature.clone())).await;
                self.store
                    .append_xp_entry(
                        learner,
                        XpEntry {
                            date: Utc::now().date_naive(),
                            amount: config.completion_bonus_xp,
                            reason: Some(format!("course-bonus:{course}")),
                            signature: Some(signature.clone()),
                        },
                    )
                    .await;
                self.metrics
                    .xp_minted_total
                    .inc_by(config.completion_bonus_xp);
                self.observe_ok(SettlementKind::FinalizeCourse, started);
                info!(learner = %learner, course = %course, signature = %signature, "course finalized");
                Ok(FinalizeCourseReceipt {
                    tx_signature: signature,
                })
            }
            Err(err) => {
                if let SettlementError::AlreadySettled { signature } = &err {
                    self.reconcile_completion_bonus(learner, course, &config, signature.clone())
                        .await;
                }
                self.fail(&key, SettlementKind::FinalizeCourse, err).await
            }
        }
    }

    /// Bring the off-chain XP ledger in line with a finalization the ledger
    /// already holds but the cache never recorded (a prior attempt whose
    /// off-chain write was lost).
    async fn reconcile_completion_bonus(
        &self,
        learner: &AccountAddress,
        course: &CourseId,
        config: &CourseConfig,
        signature: Option<TxSignature>,
    ) {
        let reason = format!("course-bonus:{course}");
        let recorded = self
            .store
            .xp_entries(learner)
            .await
            .iter()
            .any(|e| e.reason.as_deref() == Some(reason.as_str()));
        if recorded {
            return;
        }
        warn!(
            learner = %learner,
            course = %course,
            "ledger already finalized, backfilling completion bonus"
        );
        self.store
            .append_xp_entry(
                learner,
                XpEntry {
                    date: Utc::now().date_naive(),
                    amount: config.completion_bonus_xp,
                    reason: Some(reason),
                    signature,
                },
            )
            .await;
    }

    /// Mint an ad-hoc XP reward. The idempotency key covers (learner,
    /// amount, reason): identical requests settle once, while a different
    /// amount or reason is a new settlement.
    pub async fn reward_xp(
        &self,
        learner: &AccountAddress,
        amount: u64,
        reason: Option<String>,
    ) -> SettlementResult<RewardXpReceipt> {
        let started = Instant::now();
        if amount == 0 {
            return Err(SettlementError::Validation(
                "xp reward amount must be positive".to_string(),
            ));
        }

        let key = IdempotencyKey {
            learner: *learner,
            resource: format!("{amount}:{}", reason.as_deref().unwrap_or("")),
            kind: SettlementKind::RewardXp,
        };
        self.admit(&key).await?;

        let built = match self.builder.build_reward_xp(learner, amount, reason.clone()).await {
            Ok(built) => built,
            Err(err) => return self.fail(&key, SettlementKind::RewardXp, err).await,
        };
        match self.submitter.submit(&built).await {
            Ok(signature) => {
                self.settle(&key, Some(signature.clone())).await;
                self.store
                    .append_xp_entry(
                        learner,
                        XpEntry {
                            date: Utc::now().date_naive(),
                            amount,
                            reason,
                            signature: Some(signature.clone()),
                        },
                    )
                    .await;
                self.metrics.xp_minted_total.inc_by(amount);
                self.observe_ok(SettlementKind::RewardXp, started);
                Ok(RewardXpReceipt {
                    tx_signature: signature,
                    amount,
                })
            }
            Err(err) => self.fail(&key, SettlementKind::RewardXp, err).await,
        }
    }

    /// Complete the daily challenge for `day`. The off-chain record and
    /// streak update are authoritative and happen first; the on-ledger
    /// achievement claim is best-effort, so a ledger outage degrades to a
    /// receipt without a signature rather than a failed challenge.
    pub async fn complete_daily_challenge(
        &self,
        learner: &AccountAddress,
        day: NaiveDate,
        xp_reward: u64,
    ) -> SettlementResult<DailyChallengeReceipt> {
        let started = Instant::now();
        if self.store.has_daily_challenge(learner, day).await {
            return Ok(DailyChallengeReceipt {
                tx_signature: None,
                already_completed: true,
            });
        }

        let key = IdempotencyKey {
            learner: *learner,
            resource: day.to_string(),
            kind: SettlementKind::DailyChallenge,
        };
        match self.guard.admit(&key).await {
            Admission::Allowed => self.metrics.settlements_inflight.inc(),
            Admission::AlreadySettled { signature } => {
                return Ok(DailyChallengeReceipt {
                    tx_signature: signature,
                    already_completed: true,
                })
            }
            Admission::InFlight => {
                self.reject("in_flight");
                return Err(SettlementError::InFlight);
            }
            Admission::RateLimited { retry_after } => {
                self.reject("rate_limited");
                return Err(SettlementError::RateLimited { retry_after });
            }
        }

        if !self.store.record_daily_challenge(learner, day).await {
            self.settle(&key, None).await;
            return Ok(DailyChallengeReceipt {
                tx_signature: None,
                already_completed: true,
            });
        }
        let (streak, transition) = self.store.streak_activity(learner, day, xp_reward).await;
        self.observe_streak(transition);
        self.store
            .append_xp_entry(
                learner,
                XpEntry {
                    date: day,
                    amount: xp_reward,
                    reason: Some("daily-challenge".to_string()),
                    signature: None,
                },
            )
            .await;

        let ledger_leg = async {
            let built = self
                .builder
                .build_daily_challenge(learner, day, streak.current_streak)
                .await?;
            self.submitter.submit(&built).await
        };
        let receipt = match ledger_leg.await {
            Ok(signature) => {
                self.settle(&key, Some(signature.clone())).await;
                DailyChallengeReceipt {
                    tx_signature: Some(signature),
                    already_completed: false,
                }
            }
            Err(SettlementError::AlreadySettled { signature }) => {
                // A prior claim landed that the off-chain marker had lost
                // track of; the slot's existence settles it.
                self.settle(&key, signature.clone()).await;
                DailyChallengeReceipt {
                    tx_signature: signature,
                    already_completed: true,
                }
            }
            Err(err) => {
                warn!(learner = %learner, %day, error = %err, "achievement claim failed, challenge recorded off-chain only");
                self.settle(&key, None).await;
                DailyChallengeReceipt {
                    tx_signature: None,
                    already_completed: false,
                }
            }
        };
        self.observe_ok(SettlementKind::DailyChallenge, started);
        Ok(receipt)
    }

    /// Issue (or upgrade in place) the credential asset for a track, with
    /// facts derived from the off-chain record: completed courses in the
    /// track, total XP, and the level that XP implies.
    pub async fn issue_or_upgrade_credential(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
        metadata_uri: String,
    ) -> SettlementResult<CredentialReceipt> {
        let started = Instant::now();
        let courses_completed = self.store.completed_courses_in_track(learner, track).await;
        if courses_completed == 0 {
            return Err(SettlementError::PreconditionFailed(format!(
                "no completed courses in track {track}"
            )));
        }
        let total_xp = self.store.total_xp(learner).await;
        let level = progress::level_for_xp(total_xp);

        let key = IdempotencyKey {
            learner: *learner,
            resource: format!("{track}:{level}:{courses_completed}"),
            kind: SettlementKind::Credential,
        };
        self.admit(&key).await?;

        let attempt = async {
            let credential = self
                .builder
                .build_credential(learner, track, level, courses_completed, total_xp, metadata_uri)
                .await?;
            let signature = self.submitter.submit(&credential.built).await?;
            Ok::<_, SettlementError>((credential, signature))
        };
        match attempt.await {
            Ok((credential, signature)) => {
                self.settle(&key, Some(signature.clone())).await;
                self.store
                    .link_credential_asset(learner, track, credential.credential_address)
                    .await;
                self.observe_ok(SettlementKind::Credential, started);
                info!(
                    learner = %learner,
                    track = %track,
                    credential = %credential.credential_address,
                    newly_issued = credential.newly_issued,
                    "credential settled"
                );
                Ok(CredentialReceipt {
                    credential_address: credential.credential_address,
                    tx_signature: signature,
                    newly_issued: credential.newly_issued,
                })
            }
            Err(err) => {
                if matches!(&err, SettlementError::AlreadySettled { .. }) {
                    // The asset exists on the ledger; make sure the
                    // off-chain record points at it.
                    let credential_address =
                        address::credential_address(self.builder.program(), learner, track);
                    warn!(
                        learner = %learner,
                        track = %track,
                        credential = %credential_address,
                        "credential already on ledger, relinking off-chain record"
                    );
                    self.store
                        .link_credential_asset(learner, track, credential_address)
                        .await;
                }
                self.fail(&key, SettlementKind::Credential, err).await
            }
        }
    }

    /// Add streak freezes to a learner's balance. Returns the new balance.
    pub async fn grant_freezes(
        &self,
        learner: &AccountAddress,
        count: u32,
    ) -> SettlementResult<u32> {
        if count == 0 {
            return Err(SettlementError::Validation(
                "freeze grant must be positive".to_string(),
            ));
        }
        Ok(self.store.grant_freezes(learner, count).await)
    }

    pub async fn streak(&self, learner: &AccountAddress) -> StreakRecord {
        self.store.streak(learner).await
    }

    async fn admit(&self, key: &IdempotencyKey) -> SettlementResult<()> {
        match self.guard.admit(key).await {
            Admission::Allowed => {
                self.metrics.settlements_inflight.inc();
                Ok(())
            }
            Admission::AlreadySettled { signature } => {
                self.reject("already_settled");
                Err(SettlementError::AlreadySettled { signature })
            }
            Admission::InFlight => {
                self.reject("in_flight");
                Err(SettlementError::InFlight)
            }
            Admission::RateLimited { retry_after } => {
                self.reject("rate_limited");
                Err(SettlementError::RateLimited { retry_after })
            }
        }
    }

    /// Resolve an admitted attempt that failed. An `AlreadySettled` from
    /// the builder or the ledger is a terminal success of some earlier
    /// attempt and is recorded as completed; anything else releases the
    /// slot for retry.
    async fn fail<T>(
        &self,
        key: &IdempotencyKey,
        kind: SettlementKind,
        err: SettlementError,
    ) -> SettlementResult<T> {
        if let SettlementError::AlreadySettled { signature } = &err {
            self.settle(key, signature.clone()).await;
        } else {
            self.guard.release(key).await;
            self.metrics.settlements_inflight.dec();
        }
        self.metrics
            .settlements_total
            .with_label_values(&[kind.as_str(), err.error_type()])
            .inc();
        Err(err)
    }

    async fn settle(&self, key: &IdempotencyKey, signature: Option<crate::types::TxSignature>) {
        self.guard.complete(key, signature).await;
        self.metrics.settlements_inflight.dec();
    }

    fn observe_ok(&self, kind: SettlementKind, started: Instant) {
        self.metrics
            .settlements_total
            .with_label_values(&[kind.as_str(), "ok"])
            .inc();
        self.metrics
            .settlement_latency
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());
    }

    fn reject(&self, reason: &str) {
        self.metrics
            .guard_rejections
            .with_label_values(&[reason])
            .inc();
    }

    fn observe_streak(&self, transition: StreakTransition) {
        match transition {
            StreakTransition::Continued | StreakTransition::Started => {
                self.metrics.streaks_continued.inc()
            }
            StreakTransition::ContinuedWithFreeze => {
                self.metrics.streaks_continued.inc();
                self.metrics.streak_freezes_consumed.inc();
            }
            StreakTransition::Reset => self.metrics.streaks_reset.inc(),
            StreakTransition::SameDay => {}
        }
    }
}
