//! Storage seam for the cycle.
//!
//! The engine only reads a snapshot and hands back one [`CycleEffects`]
//! bundle; how it is persisted is up to the gateway. Implementations must
//! apply the bundle as one all-or-nothing transaction.

use crate::commit::CycleEffects;
use crate::error::{PlusError, Result};
use crate::types::{Ballot, MembershipStatus, Snapshot, Suggestion, UserId, VotingSummary};

pub trait StorageGateway {
    /// Every ballot not yet marked stale.
    fn fetch_active_ballots(&self) -> Result<Vec<Ballot>>;
    fn fetch_membership_statuses(&self) -> Result<Vec<MembershipStatus>>;
    fn fetch_suggestions(&self) -> Result<Vec<Suggestion>>;
    /// Apply every effect of the cycle in one transaction.
    fn apply_cycle_commit(&mut self, effects: &CycleEffects) -> Result<()>;

    fn fetch_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            ballots: self.fetch_active_ballots()?,
            statuses: self.fetch_membership_statuses()?,
            suggestions: self.fetch_suggestions()?,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryGateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct Tables {
    ballots: Vec<Ballot>,
    statuses: Vec<MembershipStatus>,
    suggestions: Vec<Suggestion>,
    summaries: Vec<VotingSummary>,
}

/// In-process gateway. Commits are applied to a copy and swapped in only
/// once every step succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryGateway {
    tables: Tables,
}

impl MemoryGateway {
    pub fn new(
        ballots: Vec<Ballot>,
        statuses: Vec<MembershipStatus>,
        suggestions: Vec<Suggestion>,
    ) -> Self {
        Self {
            tables: Tables {
                ballots,
                statuses,
                suggestions,
                summaries: Vec::new(),
            },
        }
    }

    pub fn ballots(&self) -> &[Ballot] {
        &self.tables.ballots
    }

    pub fn statuses(&self) -> &[MembershipStatus] {
        &self.tables.statuses
    }

    pub fn status(&self, user_id: UserId) -> Option<&MembershipStatus> {
        self.tables.statuses.iter().find(|s| s.user_id == user_id)
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.tables.suggestions
    }

    pub fn summaries(&self) -> &[VotingSummary] {
        &self.tables.summaries
    }

    pub fn push_ballot(&mut self, ballot: Ballot) {
        self.tables.ballots.push(ballot);
    }

    pub fn push_suggestion(&mut self, suggestion: Suggestion) {
        self.tables.suggestions.push(suggestion);
    }
}

fn status_mut(tables: &mut Tables, user_id: UserId) -> Result<&mut MembershipStatus> {
    tables
        .statuses
        .iter_mut()
        .find(|s| s.user_id == user_id)
        .ok_or_else(|| PlusError::Transaction(format!("no membership status for user {user_id}")))
}

fn apply(tables: &mut Tables, effects: &CycleEffects) -> Result<()> {
    tables.ballots.retain(|b| !b.is_stale);
    for ballot in &mut tables.ballots {
        ballot.is_stale = true;
    }
    tables.suggestions.clear();
    tables.summaries.extend(effects.summaries.iter().cloned());

    for status in &mut tables.statuses {
        status.voucher_id = None;
        status.vouch_tier = None;
    }
    for &user_id in &effects.expired_cooldowns {
        status_mut(tables, user_id)?.can_vouch_again_after = None;
    }
    for (&tier, users) in &effects.membership {
        for &user_id in users {
            status_mut(tables, user_id)?.membership_tier = tier;
        }
    }
    for status in &mut tables.statuses {
        status.can_vouch_for = None;
    }
    for (&tier, users) in &effects.vouch_grants {
        for &user_id in users {
            status_mut(tables, user_id)?.can_vouch_for = Some(tier);
        }
    }
    for &voucher_id in &effects.revoked_vouchers {
        status_mut(tables, voucher_id)?.can_vouch_again_after = Some(effects.can_vouch_again_after);
    }
    Ok(())
}

impl StorageGateway for MemoryGateway {
    fn fetch_active_ballots(&self) -> Result<Vec<Ballot>> {
        Ok(self
            .tables
            .ballots
            .iter()
            .filter(|b| !b.is_stale)
            .cloned()
            .collect())
    }

    fn fetch_membership_statuses(&self) -> Result<Vec<MembershipStatus>> {
        Ok(self.tables.statuses.clone())
    }

    fn fetch_suggestions(&self) -> Result<Vec<Suggestion>> {
        Ok(self.tables.suggestions.clone())
    }

    fn apply_cycle_commit(&mut self, effects: &CycleEffects) -> Result<()> {
        let mut staged = self.tables.clone();
        apply(&mut staged, effects)?;
        self.tables = staged;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
