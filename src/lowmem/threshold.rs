// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::bail;
use anyhow::Result;
use log::info;

use crate::config::BreachPredicate;
use crate::lowmem::catalog::MemorySample;

/// oom_score_adj range.
pub const SCORE_MAX: i32 = 1000;
/// Legacy oom_adj range is [LEGACY_SCORE_MIN, LEGACY_SCORE_MAX].
pub const LEGACY_SCORE_MIN: i32 = -17;
pub const LEGACY_SCORE_MAX: i32 = 15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThresholdTier {
    pub cutoff_score: i16,
    pub min_free_pages: u32,
}

/// The most severe breached tier of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveTier {
    pub index: usize,
    pub cutoff_score: i16,
    pub min_free_pages: u32,
    /// Nominal page deficit. Informational only.
    pub target_pages: i64,
}

/// Cutoff scores and minfree values are configured separately. Only the first
/// `min(cutoffs, minfree, max_tiers)` entries are used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdTable {
    cutoff_scores: Vec<i16>,
    min_free_pages: Vec<u32>,
    max_tiers: usize,
}

impl ThresholdTable {
    pub fn new(cutoff_scores: Vec<i16>, min_free_pages: Vec<u32>, max_tiers: usize) -> Self {
        ThresholdTable {
            cutoff_scores,
            min_free_pages,
            max_tiers,
        }
    }

    pub fn effective_len(&self) -> usize {
        effective_len(&self.cutoff_scores, &self.min_free_pages, self.max_tiers)
    }

    pub fn max_tiers(&self) -> usize {
        self.max_tiers
    }

    pub fn cutoff_scores(&self) -> &[i16] {
        &self.cutoff_scores
    }

    pub fn min_free_pages(&self) -> &[u32] {
        &self.min_free_pages
    }

    pub fn replace_cutoff_scores(&mut self, cutoff_scores: Vec<i16>) {
        self.cutoff_scores = cutoff_scores;
    }

    pub fn replace_min_free_pages(&mut self, min_free_pages: Vec<u32>) {
        self.min_free_pages = min_free_pages;
    }

    pub fn tiers(&self) -> impl Iterator<Item = ThresholdTier> + '_ {
        self.cutoff_scores
            .iter()
            .zip(self.min_free_pages.iter())
            .take(self.max_tiers)
            .map(|(&cutoff_score, &min_free_pages)| ThresholdTier {
                cutoff_score,
                min_free_pages,
            })
    }

    /// Returns the first breached tier. Tables ascend by minfree so the first
    /// breached tier is the most severe one.
    pub fn evaluate(
        &self,
        sample: &MemorySample,
        predicate: BreachPredicate,
    ) -> Option<ActiveTier> {
        self.tiers().enumerate().find_map(|(index, tier)| {
            if !predicate.is_breached(sample.free_pages, sample.file_pages, tier.min_free_pages) {
                return None;
            }
            Some(ActiveTier {
                index,
                cutoff_score: tier.cutoff_score,
                min_free_pages: tier.min_free_pages,
                target_pages: i64::from(tier.min_free_pages)
                    - (sample.free_pages + sample.file_pages),
            })
        })
    }
}

pub fn effective_len<A, B>(cutoff_scores: &[A], min_free_pages: &[B], max_tiers: usize) -> usize {
    cutoff_scores.len().min(min_free_pages.len()).min(max_tiers)
}

/// Checks that both arrays are non-decreasing over the effective length: the
/// most severe tier has the smallest minfree and the lowest cutoff.
pub fn check_ordering(cutoff_scores: &[i16], min_free_pages: &[u32], max_tiers: usize) -> Result<()> {
    let len = effective_len(cutoff_scores, min_free_pages, max_tiers);
    if let Some(i) = (1..len).find(|&i| min_free_pages[i] < min_free_pages[i - 1]) {
        bail!(
            "minfree[{}] = {} is lower than minfree[{}] = {}",
            i,
            min_free_pages[i],
            i - 1,
            min_free_pages[i - 1]
        );
    }
    if let Some(i) = (1..len).find(|&i| cutoff_scores[i] < cutoff_scores[i - 1]) {
        bail!(
            "cutoff[{}] = {} is lower than cutoff[{}] = {}",
            i,
            cutoff_scores[i],
            i - 1,
            cutoff_scores[i - 1]
        );
    }
    Ok(())
}

fn legacy_to_score(legacy: i32) -> i32 {
    if legacy == LEGACY_SCORE_MAX {
        SCORE_MAX
    } else {
        legacy * SCORE_MAX / -LEGACY_SCORE_MIN
    }
}

/// Rescales cutoffs written in legacy oom_adj units to oom_score_adj units.
/// Looks at up to `max_tiers` entries regardless of the minfree length, so
/// a later minfree write can't enable a tier still in legacy units. Only
/// applies when the last of them looks like a legacy value that would land
/// above the legacy range once rescaled. Returns whether the cutoffs were
/// rescaled.
pub fn rescale_legacy_scores(cutoff_scores: &mut [i16], max_tiers: usize) -> bool {
    let len = max_tiers.min(cutoff_scores.len());
    let Some(&last) = cutoff_scores[..len].last() else {
        return false;
    };
    let last = i32::from(last);
    if last > LEGACY_SCORE_MAX || legacy_to_score(last) <= LEGACY_SCORE_MAX {
        return false;
    }

    info!("Converting legacy oom_adj cutoffs to oom_score_adj");
    for score in cutoff_scores[..len].iter_mut() {
        let legacy = i32::from(*score);
        let converted = legacy_to_score(legacy).clamp(-SCORE_MAX, SCORE_MAX);
        // Within i16 after the clamp.
        *score = converted as i16;
        info!("oom_adj {} => oom_score_adj {}", legacy, converted);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(free_pages: i64, file_pages: i64) -> MemorySample {
        MemorySample {
            free_pages,
            file_pages,
            reclaimable_pages: 0,
        }
    }

    #[test]
    fn test_evaluate_selects_first_breached_tier() {
        let table = ThresholdTable::new(vec![0, 8], vec![1024, 4096], 6);
        let tier = table
            .evaluate(&sample(3000, 3000), BreachPredicate::FreeAndFile)
            .unwrap();
        assert_eq!(tier.index, 1);
        assert_eq!(tier.cutoff_score, 8);
        assert_eq!(tier.target_pages, 4096 - 6000);
    }

    #[test]
    fn test_evaluate_most_severe_tier() {
        let table = ThresholdTable::new(vec![0, 8], vec![1024, 4096], 6);
        let tier = table
            .evaluate(&sample(100, 200), BreachPredicate::FreeAndFile)
            .unwrap();
        assert_eq!(tier.index, 0);
        assert_eq!(tier.cutoff_score, 0);
        assert_eq!(tier.target_pages, 1024 - 300);
    }

    #[test]
    fn test_evaluate_no_action() {
        let table = ThresholdTable::new(vec![0, 8], vec![1024, 4096], 6);
        assert_eq!(
            table.evaluate(&sample(5000, 100), BreachPredicate::FreeAndFile),
            None
        );
        // File cache alone is enough with the default predicate.
        assert_eq!(
            table.evaluate(&sample(100, 5000), BreachPredicate::FreeAndFile),
            None
        );
    }

    #[test]
    fn test_evaluate_predicates() {
        let table = ThresholdTable::new(vec![0, 8], vec![1024, 4096], 6);
        let free_only = table
            .evaluate(&sample(100, 5000), BreachPredicate::FreeOnly)
            .unwrap();
        assert_eq!(free_only.index, 0);
        assert_eq!(
            table.evaluate(&sample(100, 5000), BreachPredicate::FileOnly),
            None
        );
        let file_only = table
            .evaluate(&sample(5000, 2000), BreachPredicate::FileOnly)
            .unwrap();
        assert_eq!(file_only.index, 1);
    }

    #[test]
    fn test_evaluate_matches_smallest_breached_index() {
        let table = ThresholdTable::new(
            vec![0, 1, 6, 12, 16, 17],
            vec![1536, 2048, 4096, 5120, 8192, 16384],
            6,
        );
        for free in (0..20000).step_by(97) {
            for file in (0..20000).step_by(389) {
                let expected = table
                    .min_free_pages()
                    .iter()
                    .position(|&m| free < i64::from(m) && file < i64::from(m));
                let actual = table
                    .evaluate(&sample(free, file), BreachPredicate::FreeAndFile)
                    .map(|tier| tier.index);
                assert_eq!(actual, expected, "free {} file {}", free, file);
            }
        }
    }

    #[test]
    fn test_effective_len_clamps_mismatched_arrays() {
        let table = ThresholdTable::new(vec![0, 1, 6, 12], vec![10, 20, 30, 40, 50, 60], 6);
        assert_eq!(table.effective_len(), 4);
        assert_eq!(table.tiers().count(), 4);
        // Only tier 5 would be breached, and it's beyond the effective length.
        assert_eq!(
            table.evaluate(&sample(55, 55), BreachPredicate::FreeAndFile),
            None
        );

        let table = ThresholdTable::new(vec![0, 1, 6, 12, 16, 17], vec![10, 20, 30, 40], 6);
        assert_eq!(table.effective_len(), 4);

        let table = ThresholdTable::new(vec![0, 1, 6], vec![10, 20, 30], 2);
        assert_eq!(table.effective_len(), 2);
        assert_eq!(
            table.evaluate(&sample(25, 25), BreachPredicate::FreeAndFile),
            None
        );
    }

    #[test]
    fn test_check_ordering() {
        assert!(check_ordering(&[0, 1, 6], &[1024, 2048, 4096], 6).is_ok());
        assert!(check_ordering(&[0, 1, 6], &[1024, 1024, 4096], 6).is_ok());
        assert!(check_ordering(&[0, 1, 6], &[4096, 2048, 1024], 6).is_err());
        assert!(check_ordering(&[6, 1, 0], &[1024, 2048, 4096], 6).is_err());
        // Out of order entries past the effective length are ignored.
        assert!(check_ordering(&[0, 1], &[1024, 2048, 1], 6).is_ok());
    }

    #[test]
    fn test_rescale_legacy_scores() {
        let mut scores = vec![0, 1, 6, 12, 15];
        assert!(rescale_legacy_scores(&mut scores, 5));
        assert_eq!(scores, vec![0, 58, 352, 705, 1000]);

        let mut scores = vec![-17, 0, 7];
        assert!(rescale_legacy_scores(&mut scores, 3));
        assert_eq!(scores, vec![-1000, 0, 411]);
    }

    #[test]
    fn test_rescale_legacy_scores_skips_modern_values() {
        // Last entry above the legacy maximum.
        let mut scores = vec![0, 58, 1000];
        assert!(!rescale_legacy_scores(&mut scores, 3));
        assert_eq!(scores, vec![0, 58, 1000]);

        // Rescaled last entry would still be within the legacy range.
        let mut scores = vec![0, 0];
        assert!(!rescale_legacy_scores(&mut scores, 2));

        let mut scores: Vec<i16> = Vec::new();
        assert!(!rescale_legacy_scores(&mut scores, 0));
    }

    #[test]
    fn test_rescale_legacy_scores_up_to_max_tiers() {
        let mut scores = vec![0, 1, 6, 12, 15];
        assert!(rescale_legacy_scores(&mut scores, 6));
        assert_eq!(scores, vec![0, 58, 352, 705, 1000]);

        // Entries past the tier limit are never evaluated and stay as written.
        let mut scores = vec![0, 6, 12, 1];
        assert!(rescale_legacy_scores(&mut scores, 3));
        assert_eq!(scores, vec![0, 352, 705, 1]);
    }
}
