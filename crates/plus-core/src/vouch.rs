//! Vouch lifecycle: penalties for vouchers whose candidate failed, vouch
//! rights for strong passes, and expiry of old penalties.

use crate::config::ResolutionConfig;
use crate::error::{PlusError, Result};
use crate::index::StatusIndex;
use crate::planner::{Decision, TransitionPlan};
use crate::types::{CycleDate, MembershipStatus, Tier, UserId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct VouchChanges {
    /// Users receiving `can_vouch_for = tier`. Everyone else is reset to none.
    pub grants: BTreeMap<Tier, BTreeSet<UserId>>,
    /// Vouchers whose candidate failed the tier they were vouched into.
    pub revoked_vouchers: BTreeSet<UserId>,
    /// Written to every revoked voucher's `can_vouch_again_after`.
    pub can_vouch_again_after: DateTime<Utc>,
    /// Users whose previous cooldown has run out and is cleared.
    pub expired_cooldowns: BTreeSet<UserId>,
}

pub fn resolve(
    plan: &TransitionPlan,
    statuses: &StatusIndex<'_>,
    all_statuses: &[MembershipStatus],
    config: &ResolutionConfig,
    now: DateTime<Utc>,
) -> Result<VouchChanges> {
    let can_vouch_again_after = CycleDate::from_now(now).cooldown_end(config.vouch_cooldown_months)?;

    let mut revoked_vouchers = BTreeSet::new();
    for evaluation in plan.evaluations.iter().filter(|e| !e.support.passed) {
        let candidate = statuses.candidate(evaluation.user_id)?;
        if candidate.vouch_tier != Some(evaluation.tier) {
            continue;
        }
        let voucher_id = candidate.voucher_id.ok_or(PlusError::VouchWithoutVoucher {
            user_id: candidate.user_id,
            tier: evaluation.tier,
        })?;
        tracing::warn!(
            voucher_id,
            candidate = candidate.user_id,
            tier = evaluation.tier.as_u8(),
            until = %can_vouch_again_after,
            "vouched candidate failed; voucher loses vouching"
        );
        revoked_vouchers.insert(voucher_id);
    }

    // The first pass per candidate settles the grant, even after a protected
    // failure at a higher tier.
    let mut settled: HashSet<UserId> = HashSet::new();
    let mut grants: BTreeMap<Tier, BTreeSet<UserId>> = BTreeMap::new();
    for evaluation in &plan.evaluations {
        if evaluation.decision != Decision::Passed || !settled.insert(evaluation.user_id) {
            continue;
        }
        if evaluation.support.vouch_eligible {
            grants
                .entry(evaluation.tier)
                .or_default()
                .insert(evaluation.user_id);
        }
    }

    let expired_cooldowns = all_statuses
        .iter()
        .filter(|s| s.can_vouch_again_after.is_some_and(|t| t < now))
        .map(|s| s.user_id)
        .collect();

    Ok(VouchChanges {
        grants,
        revoked_vouchers,
        can_vouch_again_after,
        expired_cooldowns,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
