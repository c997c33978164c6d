// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Off-chain progress state: course catalog, enrollments with their lesson
//! bitmaps, streak records, daily-challenge markers, the XP ledger, and
//! linked credential assets.
//!
//! `ProgressStore` is the persistence seam; the in-memory implementation
//! keeps everything under one `RwLock` so a lesson completion (bitmap write
//! plus completion timestamp) is observed atomically.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{SettlementError, SettlementResult};
use crate::progress;
use crate::streak::{StreakRecord, StreakTransition};
use crate::types::{
    AccountAddress, CourseConfig, CourseId, Enrollment, LessonProgress, TrackId, XpEntry,
};

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn course(&self, id: &CourseId) -> Option<CourseConfig>;
    async fn upsert_course(&self, config: CourseConfig);

    async fn enrollment(&self, learner: &AccountAddress, course: &CourseId) -> Option<Enrollment>;

    /// Set one lesson bit, enrolling the learner on first contact.
    /// The returned snapshot reflects the state after the write.
    async fn mark_lesson_complete(
        &self,
        learner: &AccountAddress,
        course: &CourseId,
        lesson_index: u32,
        now: DateTime<Utc>,
    ) -> SettlementResult<LessonProgress>;

    /// Record streak activity for a calendar day, returning the updated
    /// record and how it changed.
    async fn streak_activity(
        &self,
        learner: &AccountAddress,
        day: NaiveDate,
        xp: u64,
    ) -> (StreakRecord, StreakTransition);

    async fn streak(&self, learner: &AccountAddress) -> StreakRecord;

    /// Add freezes to a learner's balance, returning the new balance.
    async fn grant_freezes(&self, learner: &AccountAddress, count: u32) -> u32;

    /// Record the daily-challenge marker for a day. Returns `false` when
    /// the marker already existed.
    async fn record_daily_challenge(&self, learner: &AccountAddress, day: NaiveDate) -> bool;

    async fn has_daily_challenge(&self, learner: &AccountAddress, day: NaiveDate) -> bool;

    async fn append_xp_entry(&self, learner: &AccountAddress, entry: XpEntry);

    async fn total_xp(&self, learner: &AccountAddress) -> u64;

    async fn xp_entries(&self, learner: &AccountAddress) -> Vec<XpEntry>;

    /// Completed courses a learner has in a track, for credential facts.
    async fn completed_courses_in_track(&self, learner: &AccountAddress, track: &TrackId) -> u32;

    async fn credential_asset(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
    ) -> Option<AccountAddress>;

    /// Link a confirmed credential asset to (learner, track) and to every
    /// completed enrollment in the track.
    async fn link_credential_asset(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
        asset: AccountAddress,
    );
}

#[derive(Default)]
struct StoreState {
    courses: HashMap<CourseId, CourseConfig>,
    enrollments: HashMap<(AccountAddress, CourseId), Enrollment>,
    streaks: HashMap<AccountAddress, StreakRecord>,
    challenges: HashMap<AccountAddress, BTreeSet<NaiveDate>>,
    xp_ledger: HashMap<AccountAddress, Vec<XpEntry>>,
    credentials: HashMap<(AccountAddress, TrackId), AccountAddress>,
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    state: RwLock<StoreState>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn course(&self, id: &CourseId) -> Option<CourseConfig> {
        self.state.read().await.courses.get(id).cloned()
    }

    async fn upsert_course(&self, config: CourseConfig) {
        debug!(course = %config.id, total_lessons = config.total_lessons, "catalog upsert");
        self.state
            .write()
            .await
            .courses
            .insert(config.id.clone(), config);
    }

    async fn enrollment(&self, learner: &AccountAddress, course: &CourseId) -> Option<Enrollment> {
        self.state
            .read()
            .await
            .enrollments
            .get(&(*learner, course.clone()))
            .cloned()
    }

    async fn mark_lesson_complete(
        &self,
        learner: &AccountAddress,
        course: &CourseId,
        lesson_index: u32,
        now: DateTime<Utc>,
    ) -> SettlementResult<LessonProgress> {
        let mut state = self.state.write().await;
        let config = state
            .courses
            .get(course)
            .cloned()
            .ok_or_else(|| SettlementError::CourseNotFound(course.to_string()))?;

        let enrollment = state
            .enrollments
            .entry((*learner, course.clone()))
            .or_insert_with(|| Enrollment::new(*learner, course.clone(), now));

        let newly_completed = progress::mark_complete(
            &mut enrollment.lesson_flags,
            lesson_index,
            config.total_lessons,
        )?;
        let completed_lessons =
            progress::count_completed(&enrollment.lesson_flags, config.total_lessons);
        let course_completed =
            progress::is_all_complete(&enrollment.lesson_flags, config.total_lessons);
        if course_completed && enrollment.completed_at.is_none() {
            enrollment.completed_at = Some(now);
            info!(learner = %learner, course = %course, "course completed");
        }

        Ok(LessonProgress {
            course: course.clone(),
            lesson_index,
            newly_completed,
            completed_lessons,
            total_lessons: config.total_lessons,
            course_completed,
            xp_earned: if newly_completed {
                config.xp_per_lesson
            } else {
                0
            },
        })
    }

    async fn streak_activity(
        &self,
        learner: &AccountAddress,
        day: NaiveDate,
        xp: u64,
    ) -> (StreakRecord, StreakTransition) {
        let mut state = self.state.write().await;
        let record = state.streaks.entry(*learner).or_default();
        let transition = record.record_activity(day, xp);
        (record.clone(), transition)
    }

    async fn streak(&self, learner: &AccountAddress) -> StreakRecord {
        self.state
            .read()
            .await
            .streaks
            .get(learner)
            .cloned()
            .unwrap_or_default()
    }

    async fn grant_freezes(&self, learner: &AccountAddress, count: u32) -> u32 {
        let mut state = self.state.write().await;
        let record = state.streaks.entry(*learner).or_default();
        record.grant_freezes(count);
        record.freeze_available
    }

    async fn record_daily_challenge(&self, learner: &AccountAddress, day: NaiveDate) -> bool {
        self.state
            .write()
            .await
            .challenges
            .entry(*learner)
            .or_default()
            .insert(day)
    }

    async fn has_daily_challenge(&self, learner: &AccountAddress, day: NaiveDate) -> bool {
        self.state
            .read()
            .await
            .challenges
            .get(learner)
            .is_some_and(|days| days.contains(&day))
    }

    async fn append_xp_entry(&self, learner: &AccountAddress, entry: XpEntry) {
        self.state
            .write()
            .await
            .xp_ledger
            .entry(*learner)
            .or_default()
            .push(entry);
    }

    async fn total_xp(&self, learner: &AccountAddress) -> u64 {
        self.state
            .read()
            .await
            .xp_ledger
            .get(learner)
            .map(|entries| entries.iter().map(|e| e.amount).sum())
            .unwrap_or(0)
    }

    async fn xp_entries(&self, learner: &AccountAddress) -> Vec<XpEntry> {
        self.state
            .read()
            .await
            .xp_ledger
            .get(learner)
            .cloned()
            .unwrap_or_default()
    }

    async fn completed_courses_in_track(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
    ) -> u32 {
        let state = self.state.read().await;
        state
            .enrollments
            .values()
            .filter(|e| {
                e.learner == *learner
                    && e.completed_at.is_some()
                    && state
                        .courses
                        .get(&e.course)
                        .is_some_and(|c| c.track == *track)
            })
            .count() as u32
    }

    async fn credential_asset(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
    ) -> Option<AccountAddress> {
        self.state
            .read()
            .await
            .credentials
            .get(&(*learner, track.clone()))
            .copied()
    }

    async fn link_credential_asset(
        &self,
        learner: &AccountAddress,
        track: &TrackId,
        asset: AccountAddress,
    ) {
        let mut state = self.state.write().await;
        state.credentials.insert((*learner, track.clone()), asset);
        let course_ids: Vec<CourseId> = state
            .courses
            .values()
            .filter(|c| c.track == *track)
            .map(|c| c.id.clone())
            .collect();
        for course in course_ids {
            if let Some(enrollment) = state.enrollments.get_mut(&(*learner, course)) {
                if enrollment.completed_at.is_some() {
                    enrollment.credential_asset = Some(asset);
                }
            }
        }
    }
}
