//! Membership transitions for one cycle.
//!
//! Tiers are evaluated 1 → 3. The first evaluation that touches a candidate
//! fixes their target tier for the cycle:
//!
//! | support | protected (suggested or vouched) | target |
//! |---------|----------------------------------|--------|
//! | passed  | either                           | the voted tier |
//! | failed  | yes                              | unchanged pre-cycle tier |
//! | failed  | no                               | one tier below, or non-member below tier 3 |
//!
//! Later evaluations of the same candidate are still recorded (the vouch
//! lifecycle needs every failure) but cannot move the target.

use crate::aggregate::Tally;
use crate::config::ResolutionConfig;
use crate::error::Result;
use crate::index::StatusIndex;
use crate::support::{self, Support};
use crate::types::{membership_tier_number, Region, Tier, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Passed,
    Protected,
    Failed,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Passed => "passed",
            Decision::Protected => "protected",
            Decision::Failed => "failed",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Evaluation / Assignment
// ---------------------------------------------------------------------------

/// The outcome of one (tier, candidate) summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub user_id: UserId,
    pub tier: Tier,
    pub region: Region,
    pub support: Support,
    pub was_suggested: bool,
    pub was_vouched: bool,
    pub previous_tier: Option<Tier>,
    pub decision: Decision,
    /// Where this evaluation alone would put the candidate.
    pub target_tier: Option<Tier>,
}

/// The evaluation that won for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub target_tier: Option<Tier>,
    pub previous_tier: Option<Tier>,
    pub decided_at: Tier,
    pub decision: Decision,
    pub vouch_eligible: bool,
}

impl Assignment {
    pub fn is_promotion(&self) -> bool {
        rank(self.target_tier) > rank(self.previous_tier)
    }

    pub fn is_demotion(&self) -> bool {
        rank(self.target_tier) < rank(self.previous_tier)
    }
}

/// Higher is better: tier 1 ranks 3, non-members rank 0.
fn rank(tier: Option<Tier>) -> u8 {
    match tier {
        Some(t) => 4 - t.as_u8(),
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// TransitionPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPlan {
    /// Every summary's evaluation, tier-major then by user id.
    pub evaluations: Vec<Evaluation>,
    pub assignments: BTreeMap<UserId, Assignment>,
}

impl TransitionPlan {
    pub fn assignment(&self, user_id: UserId) -> Option<&Assignment> {
        self.assignments.get(&user_id)
    }

    /// Candidates grouped by the membership tier they end the cycle in.
    pub fn membership_sets(&self) -> BTreeMap<Option<Tier>, BTreeSet<UserId>> {
        let mut sets: BTreeMap<Option<Tier>, BTreeSet<UserId>> = BTreeMap::new();
        for (&user_id, assignment) in &self.assignments {
            sets.entry(assignment.target_tier).or_default().insert(user_id);
        }
        sets
    }
}

/// Resolve support for every summary in `tally` and assign target tiers.
pub fn plan(
    tally: &Tally,
    statuses: &StatusIndex<'_>,
    config: &ResolutionConfig,
) -> Result<TransitionPlan> {
    let mut result = TransitionPlan::default();

    for tier in Tier::ALL {
        for summary in tally.for_tier(tier) {
            let candidate = statuses.candidate(summary.user_id)?;
            let support = support::resolve(
                &summary.counts_na,
                &summary.counts_eu,
                candidate.region,
                tier,
                config,
            )?;

            let (decision, target_tier) = if support.passed {
                (Decision::Passed, Some(tier))
            } else if summary.was_suggested || summary.was_vouched {
                (Decision::Protected, candidate.membership_tier)
            } else {
                (Decision::Failed, tier.demotion_target())
            };

            tracing::debug!(
                user_id = summary.user_id,
                tier = tier.as_u8(),
                percentage = support.percentage,
                decision = decision.as_str(),
                target = membership_tier_number(target_tier),
                "candidate evaluated"
            );

            result
                .assignments
                .entry(summary.user_id)
                .or_insert(Assignment {
                    target_tier,
                    previous_tier: candidate.membership_tier,
                    decided_at: tier,
                    decision,
                    vouch_eligible: support.vouch_eligible,
                });

            result.evaluations.push(Evaluation {
                user_id: summary.user_id,
                tier,
                region: candidate.region,
                support,
                was_suggested: summary.was_suggested,
                was_vouched: summary.was_vouched,
                previous_tier: candidate.membership_tier,
                decision,
                target_tier,
            });
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
