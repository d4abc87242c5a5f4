//! One monthly cycle, end to end.
//!
//! ```text
//! snapshot ─▶ aggregate ─▶ plan (support per candidate) ─▶ vouch changes
//!                                                   └──────────┴─▶ CycleEffects ─▶ commit
//! ```
//!
//! [`resolve`] is pure. [`run_cycle`] reads a snapshot through the gateway,
//! resolves it and commits the result; nothing is written unless every step
//! before the commit succeeded.

use crate::aggregate::aggregate;
use crate::commit::{CycleCommitter, CycleEffects};
use crate::config::ResolutionConfig;
use crate::error::Result;
use crate::gateway::StorageGateway;
use crate::index::StatusIndex;
use crate::planner::{self, Decision};
use crate::types::{CycleDate, Snapshot, Tier, UserId};
use crate::vouch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub user_id: UserId,
    pub name: String,
    pub tier: Tier,
    /// Rounded to one decimal for display.
    pub percentage: f64,
    pub passed: bool,
    pub vouch_eligible: bool,
    pub was_suggested: bool,
    pub was_vouched: bool,
    pub decision: Decision,
    /// The tier the candidate actually ends the cycle in.
    pub target_tier: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub month: u32,
    pub year: i32,
    pub outcomes: Vec<CandidateOutcome>,
    pub promoted: usize,
    pub demoted: usize,
    pub revoked_vouchers: Vec<UserId>,
    pub vouch_grants: usize,
    pub committed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CyclePlan {
    pub effects: CycleEffects,
    pub report: CycleReport,
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Resolve a snapshot into the full set of cycle effects. Performs no I/O.
pub fn resolve(
    snapshot: &Snapshot,
    config: &ResolutionConfig,
    now: DateTime<Utc>,
) -> Result<CyclePlan> {
    let cycle = CycleDate::from_now(now);
    let statuses = StatusIndex::build(&snapshot.statuses)?;

    let tally = aggregate(&snapshot.ballots, &statuses, &snapshot.suggestions, cycle)?;
    let plan = planner::plan(&tally, &statuses, config)?;
    let vouch = vouch::resolve(&plan, &statuses, &snapshot.statuses, config, now)?;

    let mut outcomes: Vec<CandidateOutcome> = plan
        .evaluations
        .iter()
        .map(|e| CandidateOutcome {
            user_id: e.user_id,
            name: statuses
                .get(e.user_id)
                .map(|s| s.name_for_voting.clone())
                .unwrap_or_default(),
            tier: e.tier,
            percentage: round_one_decimal(e.support.percentage),
            passed: e.support.passed,
            vouch_eligible: e.support.vouch_eligible,
            was_suggested: e.was_suggested,
            was_vouched: e.was_vouched,
            decision: e.decision,
            target_tier: plan
                .assignment(e.user_id)
                .map(|a| a.target_tier)
                .unwrap_or(e.target_tier),
        })
        .collect();
    outcomes.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then(b.percentage.total_cmp(&a.percentage))
            .then(a.user_id.cmp(&b.user_id))
    });

    let report = CycleReport {
        month: cycle.month,
        year: cycle.year,
        outcomes,
        promoted: plan.assignments.values().filter(|a| a.is_promotion()).count(),
        demoted: plan.assignments.values().filter(|a| a.is_demotion()).count(),
        revoked_vouchers: vouch.revoked_vouchers.iter().copied().collect(),
        vouch_grants: vouch.grants.values().map(|s| s.len()).sum(),
        committed: false,
    };

    let effects = CycleEffects {
        now,
        summaries: tally.into_summaries(),
        expired_cooldowns: vouch.expired_cooldowns,
        membership: plan.membership_sets(),
        vouch_grants: vouch.grants,
        revoked_vouchers: vouch.revoked_vouchers,
        can_vouch_again_after: vouch.can_vouch_again_after,
    };

    Ok(CyclePlan { effects, report })
}

/// Read the current snapshot through `gateway` and resolve it without
/// writing anything.
pub fn preview_cycle<G: StorageGateway + ?Sized>(
    gateway: &G,
    config: &ResolutionConfig,
    now: DateTime<Utc>,
) -> Result<CyclePlan> {
    config.ensure_valid()?;
    for warning in config.validate() {
        tracing::warn!("{}", warning.message);
    }

    let snapshot = gateway.fetch_snapshot()?;
    tracing::info!(
        ballots = snapshot.ballots.len(),
        statuses = snapshot.statuses.len(),
        suggestions = snapshot.suggestions.len(),
        "snapshot loaded"
    );
    resolve(&snapshot, config, now)
}

/// Run one full cycle: snapshot, resolve, and commit atomically.
pub fn run_cycle<G: StorageGateway + ?Sized>(
    gateway: &mut G,
    config: &ResolutionConfig,
    now: DateTime<Utc>,
) -> Result<CycleReport> {
    let CyclePlan { effects, mut report } = preview_cycle(gateway, config, now)?;
    CycleCommitter::commit(gateway, &effects)?;
    report.committed = true;
    tracing::info!(
        month = report.month,
        year = report.year,
        promoted = report.promoted,
        demoted = report.demoted,
        revoked = report.revoked_vouchers.len(),
        "cycle committed"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CycleEffects;
    use crate::error::{ErrorKind, PlusError};
    use crate::gateway::MemoryGateway;
    use crate::types::{
        Ballot, MembershipStatus, Region, Score, Suggestion, VoteCounts, VotingSummary,
    };
    use chrono::TimeZone;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 28, 21, 0, 0).unwrap()
    }

    fn ballot(voter_id: UserId, voted_id: UserId, tier: Tier, score: i8) -> Ballot {
        Ballot {
            voter_id,
            voted_id,
            tier,
            score: Score::try_from(score).unwrap(),
            is_stale: false,
        }
    }

    fn na_voters(ids: std::ops::RangeInclusive<UserId>) -> Vec<MembershipStatus> {
        ids.map(|id| MembershipStatus::new(id, Some(Tier::One), Region::Na))
            .collect()
    }

    /// Casts `counts` (indexed -2, -1, +1, +2) from consecutive NA voters 1..
    fn ballots_from_counts(candidate: UserId, tier: Tier, counts: [u32; 4]) -> Vec<Ballot> {
        let mut voter = 0;
        let mut out = Vec::new();
        for (bucket, &n) in counts.iter().enumerate() {
            let score = [-2i8, -1, 1, 2][bucket];
            for _ in 0..n {
                voter += 1;
                out.push(ballot(voter, candidate, tier, score));
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[test]
    fn scenario_tier_one_unprotected_pass() {
        let mut statuses = na_voters(1..=10);
        statuses.push(MembershipStatus::new(100, Some(Tier::Two), Region::Na));
        let snapshot = Snapshot {
            ballots: ballots_from_counts(100, Tier::One, [0, 0, 3, 1]),
            statuses,
            suggestions: Vec::new(),
        };
        let plan = resolve(&snapshot, &ResolutionConfig::default(), at(2024, 3)).unwrap();
        let outcome = &plan.report.outcomes[0];
        assert!(outcome.passed);
        assert_eq!(outcome.target_tier, Some(Tier::One));
        assert_eq!(
            plan.effects.membership.get(&Some(Tier::One)),
            Some(&[100].into_iter().collect())
        );
        assert_eq!(plan.report.promoted, 1);
    }

    #[test]
    fn scenario_suggested_failure_keeps_tier() {
        let mut statuses = na_voters(1..=10);
        statuses.push(MembershipStatus::new(100, Some(Tier::Three), Region::Na));
        let snapshot = Snapshot {
            ballots: ballots_from_counts(100, Tier::Two, [2, 1, 0, 0]),
            statuses,
            suggestions: vec![Suggestion {
                suggested_id: 100,
                suggester_id: 1,
                tier: Tier::Two,
                description: String::new(),
                is_resuggestion: false,
            }],
        };
        let plan = resolve(&snapshot, &ResolutionConfig::default(), at(2024, 3)).unwrap();
        let outcome = &plan.report.outcomes[0];
        assert!(!outcome.passed);
        assert_eq!(outcome.decision, Decision::Protected);
        assert_eq!(outcome.target_tier, Some(Tier::Three));
        assert_eq!(plan.report.demoted, 0);
    }

    #[test]
    fn scenario_vouched_tier_three_failure_penalizes_voucher() {
        let mut statuses = na_voters(1..=10);
        let mut vouched = MembershipStatus::new(100, None, Region::Na);
        vouched.voucher_id = Some(7);
        vouched.vouch_tier = Some(Tier::Three);
        statuses.push(vouched);
        let snapshot = Snapshot {
            ballots: ballots_from_counts(100, Tier::Three, [3, 0, 1, 0]),
            statuses,
            suggestions: Vec::new(),
        };

        let plan = resolve(&snapshot, &ResolutionConfig::default(), at(2024, 8)).unwrap();
        assert_eq!(plan.report.revoked_vouchers, vec![7]);
        // August + 5 → January next year
        assert_eq!(
            plan.effects.can_vouch_again_after,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );

        let plan = resolve(&snapshot, &ResolutionConfig::default(), at(2024, 2)).unwrap();
        assert_eq!(
            plan.effects.can_vouch_again_after,
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
        );
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    fn mixed_snapshot() -> Snapshot {
        let mut statuses = na_voters(1..=6);
        statuses.extend([
            MembershipStatus::new(7, Some(Tier::Two), Region::Eu),
            MembershipStatus::new(8, Some(Tier::Three), Region::Eu),
        ]);
        statuses.extend([
            MembershipStatus::new(100, Some(Tier::One), Region::Na),
            MembershipStatus::new(101, Some(Tier::Two), Region::Eu),
            MembershipStatus::new(102, Some(Tier::Three), Region::Na),
            MembershipStatus::new(103, None, Region::Eu),
        ]);
        let mut ballots = Vec::new();
        for (voter, s) in [(1, 2), (2, 1), (3, -1), (7, 1)] {
            ballots.push(ballot(voter, 100, Tier::One, s));
        }
        for (voter, s) in [(1, -2), (2, -1), (7, -2), (8, -1)] {
            ballots.push(ballot(voter, 101, Tier::Two, s));
        }
        for (voter, s) in [(1, 1), (4, -2), (5, -2), (8, 1)] {
            ballots.push(ballot(voter, 102, Tier::Three, s));
        }
        for (voter, s) in [(3, 1), (6, 1), (7, 2), (8, 2)] {
            ballots.push(ballot(voter, 103, Tier::Three, s));
        }
        Snapshot {
            ballots,
            statuses,
            suggestions: Vec::new(),
        }
    }

    #[test]
    fn planned_tiers_follow_the_rules() {
        let snapshot = mixed_snapshot();
        let plan = resolve(&snapshot, &ResolutionConfig::default(), at(2024, 5)).unwrap();
        for outcome in &plan.report.outcomes {
            let previous = snapshot
                .statuses
                .iter()
                .find(|s| s.user_id == outcome.user_id)
                .unwrap()
                .membership_tier;
            let expected = match outcome.decision {
                Decision::Passed => Some(outcome.tier),
                Decision::Protected => previous,
                Decision::Failed => outcome.tier.demotion_target(),
            };
            assert_eq!(outcome.target_tier, expected, "user {}", outcome.user_id);
        }
    }

    #[test]
    fn permuting_ballots_changes_nothing() {
        let snapshot = mixed_snapshot();
        let now = at(2024, 5);
        let base = resolve(&snapshot, &ResolutionConfig::default(), now).unwrap();
        for shift in 1..snapshot.ballots.len() {
            let mut permuted = snapshot.clone();
            permuted.ballots.rotate_left(shift);
            if shift % 2 == 0 {
                permuted.ballots.reverse();
            }
            let other = resolve(&permuted, &ResolutionConfig::default(), now).unwrap();
            assert_eq!(other.effects, base.effects);
            assert_eq!(other.report, base.report);
        }
    }

    #[test]
    fn outcomes_sorted_by_tier_then_percentage() {
        let plan = resolve(&mixed_snapshot(), &ResolutionConfig::default(), at(2024, 5)).unwrap();
        let outcomes = &plan.report.outcomes;
        for pair in outcomes.windows(2) {
            assert!(
                pair[0].tier < pair[1].tier
                    || (pair[0].tier == pair[1].tier && pair[0].percentage >= pair[1].percentage)
            );
        }
    }

    // -----------------------------------------------------------------------
    // run_cycle
    // -----------------------------------------------------------------------

    fn gateway_from(snapshot: Snapshot) -> MemoryGateway {
        let mut g = MemoryGateway::new(Vec::new(), snapshot.statuses, snapshot.suggestions);
        for b in snapshot.ballots {
            g.push_ballot(b);
        }
        g
    }

    #[test]
    fn run_cycle_commits_everything() {
        let mut snapshot = mixed_snapshot();
        snapshot.suggestions.push(Suggestion {
            suggested_id: 103,
            suggester_id: 1,
            tier: Tier::Three,
            description: String::new(),
            is_resuggestion: false,
        });
        let mut gateway = gateway_from(snapshot);
        gateway.push_ballot(Ballot {
            is_stale: true,
            ..ballot(1, 100, Tier::One, -2)
        });

        let report = run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 5)).unwrap();
        assert!(report.committed);
        assert!(gateway.suggestions().is_empty());
        assert_eq!(gateway.ballots().len(), 16);
        assert!(gateway.ballots().iter().all(|b| b.is_stale));
        assert_eq!(gateway.summaries().len(), 4);
        for outcome in &report.outcomes {
            assert_eq!(
                gateway.status(outcome.user_id).unwrap().membership_tier,
                outcome.target_tier
            );
        }

        // nothing active left: the next cycle only purges
        let next = run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 6)).unwrap();
        assert!(next.outcomes.is_empty());
        assert!(gateway.ballots().is_empty());
    }

    #[test]
    fn vouch_pair_is_cleared_for_everyone() {
        let mut statuses = na_voters(1..=3);
        let mut untouched = MembershipStatus::new(50, None, Region::Na);
        untouched.voucher_id = Some(1);
        untouched.vouch_tier = Some(Tier::Two);
        statuses.push(untouched);
        let mut gateway = MemoryGateway::new(Vec::new(), statuses, Vec::new());
        run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 1)).unwrap();
        let status = gateway.status(50).unwrap();
        assert_eq!((status.voucher_id, status.vouch_tier), (None, None));
    }

    struct BrokenGateway(MemoryGateway);

    impl StorageGateway for BrokenGateway {
        fn fetch_active_ballots(&self) -> Result<Vec<Ballot>> {
            self.0.fetch_active_ballots()
        }
        fn fetch_membership_statuses(&self) -> Result<Vec<MembershipStatus>> {
            self.0.fetch_membership_statuses()
        }
        fn fetch_suggestions(&self) -> Result<Vec<Suggestion>> {
            self.0.fetch_suggestions()
        }
        fn apply_cycle_commit(&mut self, _effects: &CycleEffects) -> Result<()> {
            Err(PlusError::Storage("connection reset".into()))
        }
    }

    #[test]
    fn storage_failure_surfaces_as_transaction_error() {
        let mut gateway = BrokenGateway(gateway_from(mixed_snapshot()));
        let before = gateway.0.clone();
        let err = run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(gateway.0, before);
    }

    #[test]
    fn integrity_failure_commits_nothing() {
        let mut snapshot = mixed_snapshot();
        snapshot.ballots.push(ballot(999, 100, Tier::One, 1));
        let mut gateway = gateway_from(snapshot);
        let before = gateway.clone();
        let err = run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert_eq!(gateway, before);
    }

    #[test]
    fn dangling_voucher_is_not_retried() {
        let mut snapshot = mixed_snapshot();
        let mut vouched = MembershipStatus::new(500, None, Region::Na);
        vouched.voucher_id = Some(999);
        vouched.vouch_tier = Some(Tier::Three);
        snapshot.statuses.push(vouched);
        snapshot.ballots.push(ballot(1, 500, Tier::Three, -2));
        let mut gateway = gateway_from(snapshot);
        let before = gateway.clone();
        let err = run_cycle(&mut gateway, &ResolutionConfig::default(), at(2024, 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);
        assert!(!err.is_retryable());
        assert_eq!(gateway, before);
    }

    #[test]
    fn invalid_config_commits_nothing() {
        let mut gateway = gateway_from(mixed_snapshot());
        let before = gateway.clone();
        let cfg = ResolutionConfig {
            other_region_weight: 2.0,
            ..ResolutionConfig::default()
        };
        let err = run_cycle(&mut gateway, &cfg, at(2024, 5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(gateway, before);
    }

    #[test]
    fn summaries_carry_cycle_month() {
        let plan = resolve(&mixed_snapshot(), &ResolutionConfig::default(), at(2023, 11)).unwrap();
        assert!(plan
            .effects
            .summaries
            .iter()
            .all(|s: &VotingSummary| s.month == 11 && s.year == 2023));
        let s = plan
            .effects
            .summaries
            .iter()
            .find(|s| s.user_id == 101)
            .unwrap();
        assert_eq!(s.counts_na, VoteCounts([1, 1, 0, 0]));
        assert_eq!(s.counts_eu, VoteCounts([1, 1, 0, 0]));
    }
}
