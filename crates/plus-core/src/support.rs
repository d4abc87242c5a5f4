//! Support resolution: a candidate's regional histograms → a percentage and
//! the pass / vouch decisions derived from it.
//!
//! Voters of the candidate's own region score on the full -2..+2 scale.
//! Voters of the opposite region are limited to ±1 when casting; any ±2 that
//! still shows up from them is counted as ±1. Each side is normalized to
//! [0, 1] on its own scale, then the two are blended with
//! `other_region_weight`. A side without ballots drops out of the blend.

use crate::config::ResolutionConfig;
use crate::error::Result;
use crate::types::{Region, Tier, VoteCounts};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Support {
    /// 0..=100, unrounded.
    pub percentage: f64,
    pub passed: bool,
    /// Only ever true when `passed` is.
    pub vouch_eligible: bool,
}

/// Normalized same-region score, or `None` without ballots.
fn same_region_score(counts: &VoteCounts) -> Option<f64> {
    let [minus_two, minus_one, plus_one, plus_two] = counts.0.map(f64::from);
    let voters = minus_two + minus_one + plus_one + plus_two;
    if voters == 0.0 {
        return None;
    }
    let mean = (2.0 * plus_two + plus_one - minus_one - 2.0 * minus_two) / voters;
    Some((mean + 2.0) / 4.0)
}

/// Normalized opposite-region score on the ±1 scale, or `None` without ballots.
fn other_region_score(counts: &VoteCounts) -> Option<f64> {
    let [minus_two, minus_one, plus_one, plus_two] = counts.0.map(f64::from);
    let against = minus_two + minus_one;
    let favor = plus_one + plus_two;
    if against + favor == 0.0 {
        return None;
    }
    let mean = (favor - against) / (against + favor);
    Some((mean + 1.0) / 2.0)
}

/// Support percentage for a candidate living in `region`.
///
/// Returns 0 when neither histogram holds a ballot.
pub fn percentage(
    counts_na: &VoteCounts,
    counts_eu: &VoteCounts,
    region: Region,
    other_region_weight: f64,
) -> f64 {
    let (same, other) = match region {
        Region::Na => (counts_na, counts_eu),
        Region::Eu => (counts_eu, counts_na),
    };
    let blended = match (same_region_score(same), other_region_score(other)) {
        (Some(s), Some(o)) => (1.0 - other_region_weight) * s + other_region_weight * o,
        (Some(s), None) => s,
        (None, Some(o)) => o,
        (None, None) => 0.0,
    };
    blended * 100.0
}

/// Resolve pass and vouch eligibility for one (tier, candidate).
///
/// Fails with [`PlusError::MissingVouchCriteria`](crate::error::PlusError::MissingVouchCriteria) when
/// the tier has no criterion, whether or not the candidate passes.
pub fn resolve(
    counts_na: &VoteCounts,
    counts_eu: &VoteCounts,
    region: Region,
    tier: Tier,
    config: &ResolutionConfig,
) -> Result<Support> {
    let criterion = config.vouch_criterion(tier)?;
    let percentage = percentage(counts_na, counts_eu, region, config.other_region_weight);
    let passed = percentage >= config.pass_threshold;
    let vouch_eligible = passed && percentage >= criterion;
    Ok(Support {
        percentage,
        passed,
        vouch_eligible,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
