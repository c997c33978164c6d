// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Day-granular activity streak state machine.
//!
//! State is `(last_activity_date, current_streak, freeze_available)`.
//! Transitions happen at most once per calendar day; same-day re-entry only
//! accumulates into that day's history entry. A "freeze" is a consumable
//! grace token that preserves continuity across a missed day. Freezes are
//! only consumed here; granting them goes through a separately gated call.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// History entries retained per learner, oldest dropped first.
pub const HISTORY_RETENTION_DAYS: usize = 90;

/// Per-day activity tally in the bounded history log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayActivity {
    pub date: NaiveDate,
    pub xp: u64,
    pub activities: u32,
}

/// How a `record_activity` call changed the counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreakTransition {
    /// First activity ever recorded for this learner.
    Started,
    /// Re-entry on an already-recorded day; counters untouched.
    SameDay,
    /// Consecutive-day continuation.
    Continued,
    /// Gap bridged by consuming one freeze.
    ContinuedWithFreeze,
    /// Gap with no freeze available; streak restarted at 1.
    Reset,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<NaiveDate>,
    pub freeze_available: u32,
    pub history: VecDeque<DayActivity>,
}

impl StreakRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity on calendar day `day`, earning `xp`.
    ///
    /// Invariant on exit: `longest_streak >= current_streak`, and
    /// `last_activity_date` never moves backwards.
    pub fn record_activity(&mut self, day: NaiveDate, xp: u64) -> StreakTransition {
        let transition = match self.last_activity_date {
            None => {
                self.current_streak = 1;
                StreakTransition::Started
            }
            // Out-of-order events (day <= last) never touch the counters
            // and never consume a freeze.
            Some(last) if day <= last => {
                self.accumulate_history(day, xp);
                return StreakTransition::SameDay;
            }
            Some(last) if Some(day) == last.succ_opt() => {
                self.current_streak += 1;
                StreakTransition::Continued
            }
            Some(_) if self.freeze_available > 0 => {
                self.freeze_available -= 1;
                self.current_streak += 1;
                StreakTransition::ContinuedWithFreeze
            }
            Some(_) => {
                self.current_streak = 1;
                StreakTransition::Reset
            }
        };

        self.last_activity_date = Some(day);
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.accumulate_history(day, xp);
        transition
    }

    /// Add freezes. Gating (who may grant, and how often) is the caller's
    /// responsibility; the state machine only consumes them.
    pub fn grant_freezes(&mut self, count: u32) {
        self.freeze_available = self.freeze_available.saturating_add(count);
    }

    /// Today's (or the matching day's) history entry absorbs the XP and
    /// activity count; the log is truncated to the most recent 90 days.
    fn accumulate_history(&mut self, day: NaiveDate, xp: u64) {
        if let Some(entry) = self.history.iter_mut().find(|e| e.date == day) {
            entry.xp += xp;
            entry.activities += 1;
            return;
        }
        self.history.push_back(DayActivity {
            date: day,
            xp,
            activities: 1,
        });
        while self.history.len() > HISTORY_RETENTION_DAYS {
            self.history.pop_front();
        }
    }

    /// Total XP currently visible in the bounded history window.
    pub fn history_xp(&self) -> u64 {
        self.history.iter().map(|e| e.xp).sum()
    }
}
