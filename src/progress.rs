// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bitmap progress tracker.
//!
//! Lesson completion is a fixed-width bit vector: bit `i % 64` of word
//! `i / 64` is set when lesson `i` is complete. All functions here are pure;
//! trailing bits at or above `total_lessons` are ignored even if set.

use crate::error::{SettlementError, SettlementResult};

/// Width of one bitmap word.
pub const WORD_BITS: u32 = 64;

/// Number of words needed to hold `total_lessons` bits.
pub fn words_for(total_lessons: u32) -> usize {
    total_lessons.div_ceil(WORD_BITS) as usize
}

fn check_index(index: u32, total_lessons: u32) -> SettlementResult<()> {
    if index >= total_lessons {
        return Err(SettlementError::Validation(format!(
            "lesson index {index} out of range, course has {total_lessons} lessons"
        )));
    }
    Ok(())
}

/// Whether lesson `index` is complete. Indexes at or above `total_lessons`
/// are a caller error, not silently false.
pub fn is_complete(flags: &[u64], index: u32, total_lessons: u32) -> SettlementResult<bool> {
    check_index(index, total_lessons)?;
    let word = (index / WORD_BITS) as usize;
    let bit = index % WORD_BITS;
    Ok(flags.get(word).is_some_and(|w| w & (1u64 << bit) != 0))
}

/// Set lesson `index` complete, growing the word vector as needed.
/// Returns `true` if the bit was newly set, `false` on idempotent replay.
pub fn mark_complete(
    flags: &mut Vec<u64>,
    index: u32,
    total_lessons: u32,
) -> SettlementResult<bool> {
    check_index(index, total_lessons)?;
    let word = (index / WORD_BITS) as usize;
    let bit = index % WORD_BITS;
    if flags.len() <= word {
        flags.resize(word + 1, 0);
    }
    let mask = 1u64 << bit;
    let newly_set = flags[word] & mask == 0;
    flags[word] |= mask;
    Ok(newly_set)
}

/// Population count over the bits below `total_lessons`.
pub fn count_completed(flags: &[u64], total_lessons: u32) -> u32 {
    completed_indices(flags, total_lessons).count() as u32
}

/// True when every lesson bit below `total_lessons` is set.
pub fn is_all_complete(flags: &[u64], total_lessons: u32) -> bool {
    count_completed(flags, total_lessons) == total_lessons
}

/// Lazy, restartable iterator over the set bit positions below
/// `total_lessons`, in ascending order.
pub fn completed_indices(flags: &[u64], total_lessons: u32) -> CompletedIndices<'_> {
    CompletedIndices {
        flags,
        total_lessons,
        next: 0,
    }
}

#[derive(Clone)]
pub struct CompletedIndices<'a> {
    flags: &'a [u64],
    total_lessons: u32,
    next: u32,
}

impl Iterator for CompletedIndices<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next < self.total_lessons {
            let index = self.next;
            self.next += 1;
            let word = (index / WORD_BITS) as usize;
            let bit = index % WORD_BITS;
            if self.flags.get(word).is_some_and(|w| w & (1u64 << bit) != 0) {
                return Some(index);
            }
        }
        None
    }
}

/// Completion percentage, rounded down. 0 for an empty course.
pub fn completion_percent(flags: &[u64], total_lessons: u32) -> u8 {
    if total_lessons == 0 {
        return 0;
    }
    (count_completed(flags, total_lessons) as u64 * 100 / total_lessons as u64) as u8
}

/// XP earned from lesson completion alone.
pub fn xp_for_progress(completed_lessons: u32, xp_per_lesson: u64) -> u64 {
    completed_lessons as u64 * xp_per_lesson
}

/// Level derived from total XP. Level 1 starts at 0 XP; each level spans
/// 1000 XP.
pub fn level_for_xp(total_xp: u64) -> u32 {
    (total_xp / 1000) as u32 + 1
}
